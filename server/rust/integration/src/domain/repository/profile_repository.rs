use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::profile::Profile;

/// ProfileRepository はプロフィール永続化のためのリポジトリトレイト。
/// (mapping_id, external_id) の一意性を保証する。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    /// マッピングの全プロフィール（離脱済みを含む）を返す。
    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<Profile>>;

    /// 外部 ID 順のページと総件数を返す。
    async fn page_by_mapping(
        &self,
        mapping_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Profile>, i64)>;

    async fn find_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Profile>>;

    /// (mapping_id, external_id) をキーに挿入または更新する。まとめて 1 トランザクションで書き込む。
    async fn upsert_many(&self, profiles: &[Profile]) -> anyhow::Result<()>;

    async fn count_active(&self, mapping_id: Uuid) -> anyhow::Result<i64>;

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()>;
}
