use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entity::mapping::Mapping;

/// MappingRepository はマッピング永続化のためのリポジトリトレイト。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MappingRepository: Send + Sync {
    async fn create(&self, mapping: &Mapping) -> anyhow::Result<()>;

    async fn update(&self, mapping: &Mapping) -> anyhow::Result<()>;

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Mapping>>;

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Mapping>>;

    /// 定期実行の期限が来たマッピング（PAUSED / IN_PROGRESS を除く）を返す。
    async fn find_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mapping>>;
}
