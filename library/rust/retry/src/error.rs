use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("すべてのリトライが失敗しました ({attempts} 回): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: E },
    /// 再試行対象外と判定されたエラー。初回の失敗でそのまま返る。
    #[error("{0}")]
    Permanent(E),
}

impl<E> RetryError<E> {
    /// into_inner は最後に観測したエラーを取り出す。
    pub fn into_inner(self) -> E {
        match self {
            RetryError::ExhaustedRetries { last_error, .. } => last_error,
            RetryError::Permanent(e) => e,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::ExhaustedRetries { .. })
    }
}
