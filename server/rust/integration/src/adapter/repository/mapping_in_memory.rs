use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::mapping::Mapping;
use crate::domain::repository::MappingRepository;

/// InMemoryMappingRepository はインメモリのマッピングリポジトリ。
pub struct InMemoryMappingRepository {
    mappings: RwLock<HashMap<Uuid, Mapping>>,
}

impl InMemoryMappingRepository {
    pub fn new() -> Self {
        Self {
            mappings: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMappingRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MappingRepository for InMemoryMappingRepository {
    async fn create(&self, mapping: &Mapping) -> anyhow::Result<()> {
        self.mappings
            .write()
            .await
            .insert(mapping.id, mapping.clone());
        Ok(())
    }

    async fn update(&self, mapping: &Mapping) -> anyhow::Result<()> {
        let mut mappings = self.mappings.write().await;
        match mappings.get_mut(&mapping.id) {
            Some(existing) => {
                *existing = mapping.clone();
                Ok(())
            }
            None => anyhow::bail!("mapping not found: {}", mapping.id),
        }
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.mappings.write().await.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Mapping>> {
        Ok(self.mappings.read().await.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Mapping>> {
        let mappings = self.mappings.read().await;
        let mut result: Vec<Mapping> = mappings
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }

    async fn find_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mapping>> {
        let mappings = self.mappings.read().await;
        let mut due: Vec<Mapping> = mappings
            .values()
            .filter(|m| m.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|m| m.next_run_at);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::mapping::{MappingStatus, SearchCriteria};

    #[tokio::test]
    async fn test_find_due_skips_paused_and_unscheduled() {
        let repo = InMemoryMappingRepository::new();
        let now = Utc::now();

        let mut due = Mapping::new("u".into(), "due".into(), SearchCriteria::default());
        due.next_run_at = Some(now - chrono::Duration::minutes(1));
        let mut paused = Mapping::new("u".into(), "paused".into(), SearchCriteria::default());
        paused.next_run_at = Some(now - chrono::Duration::minutes(1));
        paused.status = MappingStatus::Paused;
        let fresh = Mapping::new("u".into(), "fresh".into(), SearchCriteria::default());
        let mut later = Mapping::new("u".into(), "later".into(), SearchCriteria::default());
        later.next_run_at = Some(now + chrono::Duration::hours(1));

        for m in [&due, &paused, &fresh, &later] {
            repo.create(m).await.unwrap();
        }

        let found = repo.find_due(now).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, due.id);
    }
}
