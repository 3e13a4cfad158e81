use chrono::{DateTime, Utc};
use uuid::Uuid;

/// IntegrationError はアカウント連携・同期オーケストレータ全体のエラー分類。
///
/// 検証・未検出・競合は呼び出し元へ即座に返す。クォータ超過とタイムアウトは
/// ワーカー内部で扱われ、最終的にジョブ/ラン の FAILED ステータスとして表面化する。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IntegrationError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("account unavailable: {0}")]
    AccountUnavailable(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("daily quota exceeded for account {account_id}, resets at {reset_at}")]
    QuotaExceeded {
        account_id: Uuid,
        reset_at: DateTime<Utc>,
    },

    #[error("connection timeout: {0}")]
    ConnectionTimeout(String),

    #[error("provider error: {0}")]
    Connector(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntegrationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(kind: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{kind} {id}"))
    }

    /// 再投入すれば成功し得るエラーかどうか。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QuotaExceeded { .. } | Self::ConnectionTimeout(_)
        )
    }
}

impl From<anyhow::Error> for IntegrationError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let quota = IntegrationError::QuotaExceeded {
            account_id: Uuid::new_v4(),
            reset_at: Utc::now(),
        };
        assert!(quota.is_retryable());
        assert!(IntegrationError::ConnectionTimeout("slow".into()).is_retryable());
        assert!(!IntegrationError::Credential("bad password".into()).is_retryable());
        assert!(!IntegrationError::validation("x").is_retryable());
    }

    #[test]
    fn test_anyhow_maps_to_internal() {
        let err: IntegrationError = anyhow::anyhow!("db down").into();
        assert_eq!(err, IntegrationError::Internal("db down".to_string()));
    }
}
