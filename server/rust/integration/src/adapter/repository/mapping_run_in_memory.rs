use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::mapping_run::{MappingRun, RunStatus};
use crate::domain::repository::MappingRunRepository;

/// InMemoryMappingRunRepository はインメモリのマッピングランリポジトリ。
/// create_if_idle は書き込みロック内で判定と挿入を行う。
pub struct InMemoryMappingRunRepository {
    runs: RwLock<HashMap<Uuid, MappingRun>>,
}

impl InMemoryMappingRunRepository {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMappingRunRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn newest_first(runs: &mut [MappingRun]) {
    runs.sort_by(|a, b| b.run_date.cmp(&a.run_date).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl MappingRunRepository for InMemoryMappingRunRepository {
    async fn create_if_idle(&self, run: &MappingRun) -> anyhow::Result<bool> {
        let mut runs = self.runs.write().await;
        let busy = runs
            .values()
            .any(|r| r.mapping_id == run.mapping_id && r.status == RunStatus::InProgress);
        if busy {
            return Ok(false);
        }
        runs.insert(run.id, run.clone());
        Ok(true)
    }

    async fn update(&self, run: &MappingRun) -> anyhow::Result<()> {
        let mut runs = self.runs.write().await;
        match runs.get_mut(&run.id) {
            Some(existing) => {
                *existing = run.clone();
                Ok(())
            }
            None => anyhow::bail!("mapping run not found: {}", run.id),
        }
    }

    async fn find_in_progress(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .find(|r| r.mapping_id == mapping_id && r.status == RunStatus::InProgress)
            .cloned())
    }

    async fn list_in_progress(&self) -> anyhow::Result<Vec<MappingRun>> {
        let runs = self.runs.read().await;
        Ok(runs
            .values()
            .filter(|r| r.status == RunStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn find_latest(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>> {
        Ok(self.list_by_mapping(mapping_id).await?.into_iter().next())
    }

    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<MappingRun>> {
        let runs = self.runs.read().await;
        let mut result: Vec<MappingRun> = runs
            .values()
            .filter(|r| r.mapping_id == mapping_id)
            .cloned()
            .collect();
        newest_first(&mut result);
        Ok(result)
    }

    async fn count_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<i64> {
        let runs = self.runs.read().await;
        let count = runs.values().filter(|r| r.mapping_id == mapping_id).count();
        Ok(i64::try_from(count)?)
    }

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()> {
        self.runs
            .write()
            .await
            .retain(|_, r| r.mapping_id != mapping_id);
        Ok(())
    }
}
