use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::scraping_job::ScrapingJob;
use crate::domain::repository::ScrapingJobRepository;

/// InMemoryScrapingJobRepository はインメモリのスクレイピングジョブリポジトリ。
pub struct InMemoryScrapingJobRepository {
    jobs: RwLock<HashMap<Uuid, ScrapingJob>>,
}

impl InMemoryScrapingJobRepository {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryScrapingJobRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScrapingJobRepository for InMemoryScrapingJobRepository {
    async fn create(&self, job: &ScrapingJob) -> anyhow::Result<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &ScrapingJob) -> anyhow::Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => anyhow::bail!("scraping job not found: {}", job.id),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ScrapingJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScrapingJob>> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<ScrapingJob> = jobs
            .values()
            .filter(|j| j.account_id == account_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn find_unfinished(&self) -> anyhow::Result<Vec<ScrapingJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| !j.is_terminal()).cloned().collect())
    }
}
