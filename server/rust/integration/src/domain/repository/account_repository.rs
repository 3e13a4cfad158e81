use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::entity::account::Account;

/// AccountRepository はアカウント永続化のためのリポジトリトレイト。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: &Account) -> anyhow::Result<()>;

    async fn update(&self, account: &Account) -> anyhow::Result<()>;

    /// 削除できた場合に true を返す。
    async fn delete(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>>;

    /// ユーザーのアカウントを作成日時の昇順で返す。
    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Account>>;
}
