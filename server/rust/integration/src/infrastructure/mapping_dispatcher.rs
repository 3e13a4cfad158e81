use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::error::IntegrationError;

/// DueMappingRunner は期限到来したマッピングを実行し、実行件数を返す。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DueMappingRunner: Send + Sync {
    async fn run_due(&self) -> Result<usize, IntegrationError>;
}

/// MappingDispatcher は一定間隔で期限到来したマッピングのランを起動するバックグラウンドタスク。
pub struct MappingDispatcher {
    runner: Arc<dyn DueMappingRunner>,
    interval: Duration,
    cancel_token: CancellationToken,
}

impl MappingDispatcher {
    pub fn new(runner: Arc<dyn DueMappingRunner>, interval: Duration, cancel_token: CancellationToken) -> Self {
        Self {
            runner,
            interval,
            cancel_token,
        }
    }

    pub fn start(&self) -> tokio::task::JoinHandle<()> {
        let runner = self.runner.clone();
        let token = self.cancel_token.clone();
        let period = self.interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match runner.run_due().await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(runs = n, "dispatched due mapping runs"),
                            Err(e) => tracing::error!(error = %e, "mapping dispatch tick failed"),
                        }
                    }
                }
            }
            tracing::info!("mapping dispatcher stopped");
        })
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_cancelled() {
        let mut runner = MockDueMappingRunner::new();
        runner.expect_run_due().times(3).returning(|| Ok(0));
        let dispatcher = MappingDispatcher::new(
            Arc::new(runner),
            Duration::from_secs(60),
            CancellationToken::new(),
        );

        let handle = dispatcher.start();
        // 最初の tick は即時、以降 60 秒ごと
        tokio::time::sleep(Duration::from_secs(130)).await;
        dispatcher.stop();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_do_not_stop_the_loop() {
        let mut runner = MockDueMappingRunner::new();
        runner
            .expect_run_due()
            .times(2)
            .returning(|| Err(IntegrationError::Internal("db down".into())));
        let dispatcher = MappingDispatcher::new(
            Arc::new(runner),
            Duration::from_secs(10),
            CancellationToken::new(),
        );

        let handle = dispatcher.start();
        tokio::time::sleep(Duration::from_secs(15)).await;
        dispatcher.stop();
        handle.await.unwrap();
    }
}
