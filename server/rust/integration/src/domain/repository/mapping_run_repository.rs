use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::mapping_run::MappingRun;

/// MappingRunRepository はマッピングラン永続化のためのリポジトリトレイト。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MappingRunRepository: Send + Sync {
    /// ランを作成する。同じマッピングに IN_PROGRESS のランが既にある場合は false を返し、何も作成しない。
    async fn create_if_idle(&self, run: &MappingRun) -> anyhow::Result<bool>;

    async fn update(&self, run: &MappingRun) -> anyhow::Result<()>;

    async fn find_in_progress(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>>;

    /// 全マッピングの IN_PROGRESS のランを返す。起動時の回収に使う。
    async fn list_in_progress(&self) -> anyhow::Result<Vec<MappingRun>>;

    async fn find_latest(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>>;

    /// ランを新しい順に返す。
    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<MappingRun>>;

    async fn count_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<i64>;

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()>;
}
