use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::sync_operation::SyncOperation;

/// SyncOperationRepository は同期履歴（追記のみ）のリポジトリトレイト。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SyncOperationRepository: Send + Sync {
    async fn create(&self, operation: &SyncOperation) -> anyhow::Result<()>;

    /// アカウントの同期履歴を新しい順に返す。
    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<SyncOperation>>;
}
