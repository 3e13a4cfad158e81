use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use uuid::Uuid;

use crate::domain::error::IntegrationError;

/// AccountWorkGuard はアカウントごとに同時に 1 件の作業（スクレイピングジョブまたは同期操作）
/// だけを許可する受付チェック。アカウントをまたぐ排他は行わない。
#[derive(Debug, Default)]
pub struct AccountWorkGuard {
    busy: Mutex<HashMap<Uuid, String>>,
}

/// WorkPermit は受付済みの作業を表す。Drop でアカウントを解放する。
#[derive(Debug)]
pub struct WorkPermit {
    guard: Arc<AccountWorkGuard>,
    account_id: Uuid,
}

impl AccountWorkGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// try_acquire はアカウントが空いていれば permit を返し、作業中なら ConflictError を返す。
    pub fn try_acquire(
        self: &Arc<Self>,
        account_id: Uuid,
        work: &str,
    ) -> Result<WorkPermit, IntegrationError> {
        let mut busy = self.busy.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = busy.get(&account_id) {
            return Err(IntegrationError::Conflict(format!(
                "account {account_id} is busy with {current}"
            )));
        }
        busy.insert(account_id, work.to_string());
        Ok(WorkPermit {
            guard: Arc::clone(self),
            account_id,
        })
    }

    pub fn is_busy(&self, account_id: Uuid) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&account_id)
    }
}

impl WorkPermit {
    pub fn account_id(&self) -> Uuid {
        self.account_id
    }
}

impl Drop for WorkPermit {
    fn drop(&mut self) {
        self.guard
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_conflicts_until_released() {
        let guard = AccountWorkGuard::new();
        let account = Uuid::new_v4();

        let permit = guard.try_acquire(account, "scraping job").unwrap();
        let err = guard.try_acquire(account, "export").unwrap_err();
        assert!(matches!(err, IntegrationError::Conflict(ref m) if m.contains("scraping job")));

        drop(permit);
        assert!(!guard.is_busy(account));
        assert!(guard.try_acquire(account, "export").is_ok());
    }

    #[test]
    fn test_accounts_are_independent() {
        let guard = AccountWorkGuard::new();
        let _a = guard.try_acquire(Uuid::new_v4(), "job").unwrap();
        assert!(guard.try_acquire(Uuid::new_v4(), "job").is_ok());
    }
}
