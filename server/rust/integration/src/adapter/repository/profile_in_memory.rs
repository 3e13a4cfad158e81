use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::profile::Profile;
use crate::domain::repository::ProfileRepository;

/// InMemoryProfileRepository はインメモリのプロフィールリポジトリ。
/// キーは (mapping_id, external_id)。
pub struct InMemoryProfileRepository {
    profiles: RwLock<HashMap<(Uuid, String), Profile>>,
}

impl InMemoryProfileRepository {
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryProfileRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProfileRepository for InMemoryProfileRepository {
    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<Profile>> {
        let profiles = self.profiles.read().await;
        let mut result: Vec<Profile> = profiles
            .values()
            .filter(|p| p.mapping_id == mapping_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.external_id.cmp(&b.external_id));
        Ok(result)
    }

    async fn page_by_mapping(
        &self,
        mapping_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Profile>, i64)> {
        let all = self.list_by_mapping(mapping_id).await?;
        let total = i64::try_from(all.len())?;
        let page = all
            .into_iter()
            .skip(usize::try_from(offset.max(0))?)
            .take(usize::try_from(limit.max(0))?)
            .collect();
        Ok((page, total))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Profile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .values()
            .filter(|p| ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn upsert_many(&self, batch: &[Profile]) -> anyhow::Result<()> {
        let mut profiles = self.profiles.write().await;
        for profile in batch {
            let key = (profile.mapping_id, profile.external_id.clone());
            match profiles.get_mut(&key) {
                // 既存行の ID と初回観測日時は維持する
                Some(existing) => {
                    let id = existing.id;
                    let first_seen_at = existing.first_seen_at;
                    *existing = profile.clone();
                    existing.id = id;
                    existing.first_seen_at = first_seen_at;
                }
                None => {
                    profiles.insert(key, profile.clone());
                }
            }
        }
        Ok(())
    }

    async fn count_active(&self, mapping_id: Uuid) -> anyhow::Result<i64> {
        let profiles = self.profiles.read().await;
        let count = profiles
            .values()
            .filter(|p| p.mapping_id == mapping_id && p.is_active())
            .count();
        Ok(i64::try_from(count)?)
    }

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()> {
        self.profiles
            .write()
            .await
            .retain(|(m, _), _| *m != mapping_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::profile::DiscoveredRecord;
    use chrono::Utc;

    fn profile(mapping_id: Uuid, external_id: &str, title: &str) -> Profile {
        Profile::from_record(
            mapping_id,
            DiscoveredRecord {
                external_id: external_id.into(),
                name: "Ada Lovelace".into(),
                job_title: Some(title.into()),
                company: None,
                location: None,
                profile_url: None,
                image_url: None,
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_external_id() {
        let repo = InMemoryProfileRepository::new();
        let mapping_id = Uuid::new_v4();
        let first = profile(mapping_id, "li:1", "Engineer");
        repo.upsert_many(&[first.clone()]).await.unwrap();
        repo.upsert_many(&[profile(mapping_id, "li:1", "CTO")])
            .await
            .unwrap();

        let all = repo.list_by_mapping(mapping_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].job_title.as_deref(), Some("CTO"));
    }

    #[tokio::test]
    async fn test_page_and_count_active() {
        let repo = InMemoryProfileRepository::new();
        let mapping_id = Uuid::new_v4();
        let mut departed = profile(mapping_id, "li:3", "PM");
        departed.mark_departed(Utc::now());
        repo.upsert_many(&[
            profile(mapping_id, "li:1", "A"),
            profile(mapping_id, "li:2", "B"),
            departed,
        ])
        .await
        .unwrap();

        let (page, total) = repo.page_by_mapping(mapping_id, 2, 1).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].external_id, "li:2");
        assert_eq!(repo.count_active(mapping_id).await.unwrap(), 2);
    }
}
