use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::domain::entity::mapping::{Mapping, SearchCriteria};
use crate::domain::entity::mapping_run::MappingRun;
use crate::domain::entity::profile::Profile;
use crate::domain::error::IntegrationError;
use crate::domain::repository::{MappingRepository, MappingRunRepository, ProfileRepository};
use crate::infrastructure::clock::Clock;
use crate::infrastructure::export_writer::{self, ExportArtifact, ExportFormat};

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct CreateMappingInput {
    pub name: String,
    pub criteria: SearchCriteria,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMappingInput {
    pub name: Option<String>,
    pub criteria: Option<SearchCriteria>,
}

/// MappingDetail はプロフィールとラン履歴を含むマッピング。
#[derive(Debug, Clone, Serialize)]
pub struct MappingDetail {
    #[serde(flatten)]
    pub mapping: Mapping,
    pub profiles: Vec<Profile>,
    pub runs: Vec<MappingRun>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfilePage {
    pub data: Vec<Profile>,
    pub pagination: Pagination,
}

/// MappingService はマッピングのライフサイクル（CRUD・一時停止/再開・一覧・エクスポート）を担う。
/// ランの実行は MappingRunEngine が行う。
pub struct MappingService {
    mapping_repo: Arc<dyn MappingRepository>,
    run_repo: Arc<dyn MappingRunRepository>,
    profile_repo: Arc<dyn ProfileRepository>,
    clock: Arc<dyn Clock>,
}

fn normalize_criteria(criteria: SearchCriteria) -> SearchCriteria {
    let clean = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    SearchCriteria {
        job_title: clean(criteria.job_title),
        company: clean(criteria.company),
        country: clean(criteria.country),
    }
}

fn require_name(name: &str) -> Result<String, IntegrationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IntegrationError::validation("name is required"));
    }
    Ok(name.to_string())
}

impl MappingService {
    pub fn new(
        mapping_repo: Arc<dyn MappingRepository>,
        run_repo: Arc<dyn MappingRunRepository>,
        profile_repo: Arc<dyn ProfileRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            mapping_repo,
            run_repo,
            profile_repo,
            clock,
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        input: CreateMappingInput,
    ) -> Result<Mapping, IntegrationError> {
        let mapping = Mapping::new(
            user_id.to_string(),
            require_name(&input.name)?,
            normalize_criteria(input.criteria),
        );
        self.mapping_repo.create(&mapping).await?;
        tracing::info!(mapping_id = %mapping.id, "mapping created");
        Ok(mapping)
    }

    async fn owned(&self, user_id: &str, id: Uuid) -> Result<Mapping, IntegrationError> {
        self.mapping_repo
            .find_by_id(id)
            .await?
            .filter(|m| m.user_id == user_id)
            .ok_or_else(|| IntegrationError::not_found("mapping", id))
    }

    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<MappingDetail, IntegrationError> {
        let mapping = self.owned(user_id, id).await?;
        let profiles = self.profile_repo.list_by_mapping(id).await?;
        let runs = self.run_repo.list_by_mapping(id).await?;
        Ok(MappingDetail {
            mapping,
            profiles,
            runs,
        })
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Mapping>, IntegrationError> {
        Ok(self.mapping_repo.list_by_user(user_id).await?)
    }

    pub async fn update(
        &self,
        user_id: &str,
        id: Uuid,
        input: UpdateMappingInput,
    ) -> Result<Mapping, IntegrationError> {
        let mut mapping = self.owned(user_id, id).await?;
        if let Some(name) = input.name {
            mapping.name = require_name(&name)?;
        }
        if let Some(criteria) = input.criteria {
            mapping.criteria = normalize_criteria(criteria);
        }
        mapping.updated_at = self.clock.now();
        self.mapping_repo.update(&mapping).await?;
        Ok(mapping)
    }

    /// delete はマッピングとそのプロフィール・ランを削除する。ラン実行中は ConflictError。
    pub async fn delete(&self, user_id: &str, id: Uuid) -> Result<(), IntegrationError> {
        let mapping = self.owned(user_id, id).await?;
        if self.run_repo.find_in_progress(mapping.id).await?.is_some() {
            return Err(IntegrationError::Conflict(format!(
                "mapping {id} has a run in progress"
            )));
        }
        self.profile_repo.delete_by_mapping(mapping.id).await?;
        self.run_repo.delete_by_mapping(mapping.id).await?;
        if !self.mapping_repo.delete(mapping.id).await? {
            return Err(IntegrationError::not_found("mapping", id));
        }
        tracing::info!(mapping_id = %id, "mapping deleted");
        Ok(())
    }

    /// pause は将来の定期実行だけを止める。実行中のランには影響しない。
    pub async fn pause(&self, user_id: &str, id: Uuid) -> Result<Mapping, IntegrationError> {
        let mut mapping = self.owned(user_id, id).await?;
        mapping.pause();
        self.mapping_repo.update(&mapping).await?;
        tracing::info!(mapping_id = %id, "mapping paused");
        Ok(mapping)
    }

    pub async fn resume(&self, user_id: &str, id: Uuid) -> Result<Mapping, IntegrationError> {
        let mut mapping = self.owned(user_id, id).await?;
        let latest = self.run_repo.find_latest(id).await?.map(|r| r.status);
        mapping.resume(latest, self.clock.now());
        self.mapping_repo.update(&mapping).await?;
        tracing::info!(mapping_id = %id, status = %mapping.status, "mapping resumed");
        Ok(mapping)
    }

    pub async fn list_profiles(
        &self,
        user_id: &str,
        id: Uuid,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<ProfilePage, IntegrationError> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
            return Err(IntegrationError::validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        let offset = offset.unwrap_or(0);
        if offset < 0 {
            return Err(IntegrationError::validation("offset must not be negative"));
        }
        let mapping = self.owned(user_id, id).await?;
        let (data, total) = self
            .profile_repo
            .page_by_mapping(mapping.id, limit, offset)
            .await?;
        let has_more = offset + i64::try_from(data.len()).unwrap_or(i64::MAX) < total;
        Ok(ProfilePage {
            data,
            pagination: Pagination {
                total,
                limit,
                offset,
                has_more,
            },
        })
    }

    /// list_runs はランを新しい順に返す。
    pub async fn list_runs(&self, user_id: &str, id: Uuid) -> Result<Vec<MappingRun>, IntegrationError> {
        let mapping = self.owned(user_id, id).await?;
        Ok(self.run_repo.list_by_mapping(mapping.id).await?)
    }

    pub async fn export(
        &self,
        user_id: &str,
        id: Uuid,
        format: ExportFormat,
    ) -> Result<ExportArtifact, IntegrationError> {
        let mapping = self.owned(user_id, id).await?;
        let profiles = self.profile_repo.list_by_mapping(mapping.id).await?;
        let artifact = export_writer::render(mapping.id, &profiles, format)?;
        tracing::info!(
            mapping_id = %id,
            format = format.extension(),
            profiles = profiles.len(),
            "mapping exported"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::mapping::MappingStatus;
    use crate::domain::repository::mapping_repository::MockMappingRepository;
    use crate::domain::repository::mapping_run_repository::MockMappingRunRepository;
    use crate::domain::repository::profile_repository::MockProfileRepository;
    use crate::infrastructure::clock::SystemClock;

    fn service(
        mappings: MockMappingRepository,
        runs: MockMappingRunRepository,
        profiles: MockProfileRepository,
    ) -> MappingService {
        MappingService::new(
            Arc::new(mappings),
            Arc::new(runs),
            Arc::new(profiles),
            Arc::new(SystemClock),
        )
    }

    fn stored(user: &str) -> Mapping {
        Mapping::new(user.into(), "CTOs".into(), SearchCriteria::default())
    }

    #[tokio::test]
    async fn test_create_trims_blank_criteria() {
        let mut mappings = MockMappingRepository::new();
        mappings.expect_create().returning(|_| Ok(()));
        let svc = service(mappings, MockMappingRunRepository::new(), MockProfileRepository::new());

        let m = svc
            .create(
                "owner",
                CreateMappingInput {
                    name: "  CTOs in Japan ".into(),
                    criteria: SearchCriteria {
                        job_title: Some("CTO".into()),
                        company: Some("   ".into()),
                        country: Some("Japan".into()),
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(m.name, "CTOs in Japan");
        assert_eq!(m.criteria.company, None);
        assert_eq!(m.status, MappingStatus::Created);
        assert_eq!(m.next_run_at, None);
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let svc = service(
            MockMappingRepository::new(),
            MockMappingRunRepository::new(),
            MockProfileRepository::new(),
        );
        let result = svc
            .create(
                "owner",
                CreateMappingInput {
                    name: " ".into(),
                    criteria: SearchCriteria::default(),
                },
            )
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_conflicts_while_run_in_progress() {
        let m = stored("owner");
        let id = m.id;
        let mut mappings = MockMappingRepository::new();
        mappings.expect_find_by_id().returning(move |_| Ok(Some(m.clone())));
        mappings.expect_delete().never();
        let mut runs = MockMappingRunRepository::new();
        runs.expect_find_in_progress()
            .returning(|mid| Ok(Some(MappingRun::start(mid, chrono::Utc::now()))));

        let svc = service(mappings, runs, MockProfileRepository::new());
        assert!(matches!(
            svc.delete("owner", id).await,
            Err(IntegrationError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let m = stored("owner");
        let id = m.id;
        let mut mappings = MockMappingRepository::new();
        mappings.expect_find_by_id().returning(move |_| Ok(Some(m.clone())));
        mappings.expect_delete().times(1).returning(|_| Ok(true));
        let mut runs = MockMappingRunRepository::new();
        runs.expect_find_in_progress().returning(|_| Ok(None));
        runs.expect_delete_by_mapping().times(1).returning(|_| Ok(()));
        let mut profiles = MockProfileRepository::new();
        profiles.expect_delete_by_mapping().times(1).returning(|_| Ok(()));

        let svc = service(mappings, runs, profiles);
        assert!(svc.delete("owner", id).await.is_ok());
    }

    #[tokio::test]
    async fn test_resume_uses_latest_run_status() {
        let mut m = stored("owner");
        m.pause();
        let id = m.id;
        let mut mappings = MockMappingRepository::new();
        mappings.expect_find_by_id().returning(move |_| Ok(Some(m.clone())));
        mappings.expect_update().returning(|_| Ok(()));
        let mut runs = MockMappingRunRepository::new();
        runs.expect_find_latest().returning(|mid| {
            let mut run = MappingRun::start(mid, chrono::Utc::now());
            run.fail("quota".into());
            Ok(Some(run))
        });

        let svc = service(mappings, runs, MockProfileRepository::new());
        let resumed = svc.resume("owner", id).await.unwrap();
        assert_eq!(resumed.status, MappingStatus::Failed);
        assert!(resumed.next_run_at.is_some());
    }

    #[tokio::test]
    async fn test_list_profiles_pagination() {
        let m = stored("owner");
        let id = m.id;
        let mut mappings = MockMappingRepository::new();
        mappings.expect_find_by_id().returning(move |_| Ok(Some(m.clone())));
        let mut profiles = MockProfileRepository::new();
        profiles
            .expect_page_by_mapping()
            .withf(|_, limit, offset| *limit == 20 && *offset == 0)
            .returning(|_, _, _| Ok((vec![], 45)));

        let svc = service(mappings, MockMappingRunRepository::new(), profiles);
        let page = svc.list_profiles("owner", id, None, None).await.unwrap();
        assert_eq!(page.pagination.total, 45);
        assert_eq!(page.pagination.limit, 20);
        assert!(page.pagination.has_more);
    }

    #[tokio::test]
    async fn test_list_profiles_rejects_large_limit() {
        let svc = service(
            MockMappingRepository::new(),
            MockMappingRunRepository::new(),
            MockProfileRepository::new(),
        );
        let result = svc.list_profiles("owner", Uuid::new_v4(), Some(500), None).await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }
}
