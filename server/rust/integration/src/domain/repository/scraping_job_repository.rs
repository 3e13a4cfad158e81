use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::scraping_job::ScrapingJob;

/// ScrapingJobRepository はスクレイピングジョブ永続化のためのリポジトリトレイト。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScrapingJobRepository: Send + Sync {
    async fn create(&self, job: &ScrapingJob) -> anyhow::Result<()>;

    async fn update(&self, job: &ScrapingJob) -> anyhow::Result<()>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ScrapingJob>>;

    /// アカウントのジョブを新しい順に返す。
    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScrapingJob>>;

    /// PENDING / RUNNING のまま残っているジョブを返す（起動時リカバリ用）。
    async fn find_unfinished(&self) -> anyhow::Result<Vec<ScrapingJob>>;
}
