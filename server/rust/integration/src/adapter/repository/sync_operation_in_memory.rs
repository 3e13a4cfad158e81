use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::sync_operation::SyncOperation;
use crate::domain::repository::SyncOperationRepository;

/// InMemorySyncOperationRepository は追記のみのインメモリ同期履歴。
pub struct InMemorySyncOperationRepository {
    operations: RwLock<Vec<SyncOperation>>,
}

impl InMemorySyncOperationRepository {
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemorySyncOperationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SyncOperationRepository for InMemorySyncOperationRepository {
    async fn create(&self, operation: &SyncOperation) -> anyhow::Result<()> {
        self.operations.write().await.push(operation.clone());
        Ok(())
    }

    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<SyncOperation>> {
        let operations = self.operations.read().await;
        // 追記順に並んでいるので逆順にすれば新しい順になる
        Ok(operations
            .iter()
            .rev()
            .filter(|o| o.account_id == account_id)
            .cloned()
            .collect())
    }
}
