use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::entity::account::Account;
use crate::domain::repository::AccountRepository;

/// InMemoryAccountRepository はインメモリのアカウントリポジトリ。
pub struct InMemoryAccountRepository {
    accounts: RwLock<HashMap<Uuid, Account>>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAccountRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn create(&self, account: &Account) -> anyhow::Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.id) {
            anyhow::bail!("account already exists: {}", account.id);
        }
        accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> anyhow::Result<()> {
        let mut accounts = self.accounts.write().await;
        match accounts.get_mut(&account.id) {
            Some(existing) => {
                *existing = account.clone();
                Ok(())
            }
            None => anyhow::bail!("account not found: {}", account.id),
        }
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self.accounts.write().await.remove(&id).is_some())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Account>> {
        let accounts = self.accounts.read().await;
        let mut result: Vec<Account> = accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by_key(|a| (a.created_at, a.id));
        Ok(result)
    }
}
