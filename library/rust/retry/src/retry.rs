use crate::error::RetryError;
use crate::policy::RetryConfig;
use std::future::Future;

/// with_retry はすべてのエラーを再試行対象として operation を実行する。
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    with_retry_if(config, operation, |_| true).await
}

/// with_retry_if は should_retry が true を返したエラーだけを指数バックオフで再試行する。
/// false を返したエラーは `RetryError::Permanent` として即座に返す。
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(RetryError::Permanent(e)),
            Err(e) => {
                tracing::warn!(
                    "リトライ試行 {}/{}: {}",
                    attempt + 1,
                    max_attempts,
                    e
                );
                if attempt + 1 >= max_attempts {
                    return Err(RetryError::ExhaustedRetries {
                        attempts: max_attempts,
                        last_error: e,
                    });
                }
                tokio::time::sleep(config.compute_delay(attempt)).await;
                attempt += 1;
            }
        }
    }
}
