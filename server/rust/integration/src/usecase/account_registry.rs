use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::credentials::CredentialBundle;
use crate::domain::entity::provider_config::{ProviderConfig, ProviderStats};
use crate::domain::entity::scraping_job::JobStatus;
use crate::domain::error::IntegrationError;
use crate::domain::repository::{AccountRepository, ScrapingJobRepository};
use crate::infrastructure::account_guard::AccountWorkGuard;
use crate::infrastructure::connector::ConnectionContext;
use crate::infrastructure::credential_vault::CredentialVault;
use crate::infrastructure::rate_limiter::{RateLimitPolicy, RateLimiter};

/// CreateAccountInput はアカウント作成の入力。config 省略時はプロバイダの既定値を使う。
#[derive(Debug, Clone)]
pub struct CreateAccountInput {
    pub name: String,
    pub credentials: CredentialBundle,
    pub config: Option<ProviderConfig>,
}

/// UpdateAccountInput は部分更新の入力。None の項目は変更しない。
#[derive(Debug, Clone, Default)]
pub struct UpdateAccountInput {
    pub name: Option<String>,
    pub credentials: Option<CredentialBundle>,
    pub config: Option<ProviderConfig>,
    pub is_active: Option<bool>,
}

/// AccountRegistry はアカウントの CRUD と状態遷移を担う。
///
/// 認証情報の書き込みは必ず CredentialVault を経由し、平文は永続化もログ出力もしない。
pub struct AccountRegistry {
    account_repo: Arc<dyn AccountRepository>,
    job_repo: Arc<dyn ScrapingJobRepository>,
    vault: Arc<CredentialVault>,
    limiter: Arc<RateLimiter>,
    guard: Arc<AccountWorkGuard>,
    failure_threshold: u32,
}

fn require_name(name: &str) -> Result<String, IntegrationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(IntegrationError::validation("name is required"));
    }
    Ok(name.to_string())
}

fn ensure_provider(
    expected: Provider,
    actual: Provider,
    what: &str,
) -> Result<(), IntegrationError> {
    if expected != actual {
        return Err(IntegrationError::validation(format!(
            "{what} is for {actual} but the account is {expected}"
        )));
    }
    Ok(())
}

impl AccountRegistry {
    pub fn new(
        account_repo: Arc<dyn AccountRepository>,
        job_repo: Arc<dyn ScrapingJobRepository>,
        vault: Arc<CredentialVault>,
        limiter: Arc<RateLimiter>,
        guard: Arc<AccountWorkGuard>,
        failure_threshold: u32,
    ) -> Self {
        Self {
            account_repo,
            job_repo,
            vault,
            limiter,
            guard,
            failure_threshold,
        }
    }

    pub async fn create(
        &self,
        user_id: &str,
        input: CreateAccountInput,
    ) -> Result<Account, IntegrationError> {
        let name = require_name(&input.name)?;
        input.credentials.validate()?;
        let provider = input.credentials.provider();
        let config = input
            .config
            .unwrap_or_else(|| ProviderConfig::default_for(provider));
        ensure_provider(provider, config.provider(), "config")?;
        config.validate()?;

        let sealed = self.vault.seal(&input.credentials)?;
        let account = Account::new(
            user_id.to_string(),
            name,
            sealed,
            input.credentials.hint(),
            config,
        );
        self.account_repo.create(&account).await?;
        self.sync_limiter(&account).await;

        tracing::info!(
            account_id = %account.id,
            provider = %account.provider,
            "account created"
        );
        Ok(account)
    }

    pub async fn update(
        &self,
        user_id: &str,
        id: Uuid,
        input: UpdateAccountInput,
    ) -> Result<Account, IntegrationError> {
        let mut account = self.get(user_id, id).await?;

        if let Some(name) = input.name {
            account.name = require_name(&name)?;
        }
        if let Some(config) = input.config {
            ensure_provider(account.provider, config.provider(), "config")?;
            config.validate()?;
            account.config = config;
        }
        if let Some(credentials) = input.credentials {
            ensure_provider(account.provider, credentials.provider(), "credentials")?;
            credentials.validate()?;
            let sealed = self.vault.seal(&credentials)?;
            account.replace_credentials(sealed, credentials.hint());
        }
        if let Some(is_active) = input.is_active {
            if is_active != account.is_active {
                account.toggle();
            }
        }
        account.updated_at = Utc::now();

        self.account_repo.update(&account).await?;
        self.sync_limiter(&account).await;
        tracing::info!(account_id = %account.id, status = %account.status, "account updated");
        Ok(account)
    }

    /// delete はアカウントを削除する。実行中のジョブや同期がある場合は ConflictError。
    pub async fn delete(&self, user_id: &str, id: Uuid) -> Result<(), IntegrationError> {
        let account = self.get(user_id, id).await?;

        let jobs = self.job_repo.list_by_account(account.id).await?;
        if jobs
            .iter()
            .any(|j| matches!(j.status, JobStatus::Running | JobStatus::Pending))
            || self.guard.is_busy(account.id)
        {
            return Err(IntegrationError::Conflict(format!(
                "account {id} has work in progress"
            )));
        }

        if !self.account_repo.delete(account.id).await? {
            return Err(IntegrationError::not_found("account", id));
        }
        self.limiter.forget(account.id).await;
        tracing::info!(account_id = %id, "account deleted");
        Ok(())
    }

    pub async fn toggle(&self, user_id: &str, id: Uuid) -> Result<Account, IntegrationError> {
        let mut account = self.get(user_id, id).await?;
        account.toggle();
        self.account_repo.update(&account).await?;
        tracing::info!(
            account_id = %account.id,
            is_active = account.is_active,
            status = %account.status,
            "account toggled"
        );
        Ok(account)
    }

    /// get はユーザーが所有するアカウントを返す。他ユーザーのアカウントは NotFound として扱う。
    pub async fn get(&self, user_id: &str, id: Uuid) -> Result<Account, IntegrationError> {
        self.account_repo
            .find_by_id(id)
            .await?
            .filter(|a| a.user_id == user_id)
            .ok_or_else(|| IntegrationError::not_found("account", id))
    }

    pub async fn list(&self, user_id: &str) -> Result<Vec<Account>, IntegrationError> {
        Ok(self.account_repo.list_by_user(user_id).await?)
    }

    /// reload はユーザー検査なしで最新の状態を読み直す（ワーカー内部用）。
    pub async fn reload(&self, id: Uuid) -> Result<Account, IntegrationError> {
        self.account_repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| IntegrationError::not_found("account", id))
    }

    pub async fn save(&self, account: &Account) -> Result<(), IntegrationError> {
        Ok(self.account_repo.update(account).await?)
    }

    /// open_context は認証情報を復号し、コネクタ呼び出し用のコンテキストを組み立てる。
    pub fn open_context(&self, account: &Account) -> Result<ConnectionContext, IntegrationError> {
        let credentials = self.vault.open(&account.credentials)?;
        Ok(ConnectionContext {
            account_id: account.id,
            provider: account.provider,
            credentials,
            config: account.config.clone(),
        })
    }

    /// sync_limiter は LinkedIn アカウントの設定と永続化済みの当日利用数をレートリミッターへ反映する。
    pub async fn sync_limiter(&self, account: &Account) {
        let Some(scraping) = account.config.scraping() else {
            return;
        };
        let seed = match &account.stats {
            ProviderStats::Linkedin(s) => {
                s.last_reset_date.map(|day| (day, s.daily_usage))
            }
            _ => None,
        };
        self.limiter
            .configure(account.id, RateLimitPolicy::from(scraping), seed)
            .await;
    }

    /// record_connector_failure は連続失敗を記録し、閾値到達で ERROR に遷移させる。
    /// 遷移した場合は true を返す。
    pub async fn record_connector_failure(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<bool, IntegrationError> {
        let mut account = self.reload(id).await?;
        let flipped = account.record_connector_failure(message, self.failure_threshold);
        self.account_repo.update(&account).await?;
        if flipped {
            tracing::warn!(
                account_id = %id,
                failures = account.consecutive_failures,
                error = %message,
                "account moved to ERROR after consecutive connector failures"
            );
        }
        Ok(flipped)
    }

    pub async fn record_connector_success(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), IntegrationError> {
        let mut account = self.reload(id).await?;
        account.record_connector_success(at);
        Ok(self.account_repo.update(&account).await?)
    }

    /// record_job_outcome はジョブ終了後に LinkedIn 統計と最終利用日時を更新する。
    pub async fn record_job_outcome(
        &self,
        id: Uuid,
        scraped: u32,
        failed: u32,
        at: DateTime<Utc>,
    ) -> Result<(), IntegrationError> {
        let mut account = self.reload(id).await?;
        let snapshot = self.limiter.snapshot(id).await;
        if let (Some(stats), Some(snapshot)) = (account.stats.linkedin_mut(), snapshot) {
            stats.record_job(scraped, failed, snapshot.used, snapshot.day);
        }
        account.last_used_at = Some(at);
        account.updated_at = Utc::now();
        Ok(self.account_repo.update(&account).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::account::AccountStatus;
    use crate::domain::entity::credentials::{HubSpotCredentials, LinkedInCredentials};
    use crate::domain::entity::provider_config::{ScrapingConfig, SalesforceConfig};
    use crate::domain::entity::scraping_job::{JobConfig, JobType, ScrapingJob};
    use crate::domain::repository::account_repository::MockAccountRepository;
    use crate::domain::repository::scraping_job_repository::MockScrapingJobRepository;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::credential_vault::MasterKey;

    fn vault() -> Arc<CredentialVault> {
        Arc::new(CredentialVault::new(
            MasterKey::from_hex(&"11".repeat(32)).unwrap(),
        ))
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Arc::new(SystemClock), chrono_tz::UTC))
    }

    fn registry(
        accounts: MockAccountRepository,
        jobs: MockScrapingJobRepository,
    ) -> AccountRegistry {
        AccountRegistry::new(
            Arc::new(accounts),
            Arc::new(jobs),
            vault(),
            limiter(),
            AccountWorkGuard::new(),
            3,
        )
    }

    fn linkedin(username: &str, password: &str) -> CredentialBundle {
        CredentialBundle::Linkedin(LinkedInCredentials {
            username: username.into(),
            password: password.into(),
            cookies: None,
            session_token: None,
            csrf_token: None,
            user_agent: None,
            proxy: None,
        })
    }

    fn stored_account(user: &str) -> Account {
        let sealed = vault().seal(&linkedin("scout", "pw")).unwrap();
        Account::new(
            user.into(),
            "scout".into(),
            sealed,
            Some("scout".into()),
            ProviderConfig::default_for(Provider::Linkedin),
        )
    }

    #[tokio::test]
    async fn test_create_encrypts_and_starts_testing() {
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_create()
            .withf(|a| !a.credentials.ciphertext.contains("hunter2"))
            .returning(|_| Ok(()));
        let uc = registry(accounts, MockScrapingJobRepository::new());

        let account = uc
            .create(
                "user-1",
                CreateAccountInput {
                    name: "Recruiting".into(),
                    credentials: linkedin("scout@example.com", "hunter2"),
                    config: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(account.status, AccountStatus::Testing);
        assert_eq!(account.credential_hint.as_deref(), Some("scout@example.com"));
        assert_eq!(
            account.config.scraping(),
            Some(&ScrapingConfig::default())
        );
    }

    #[tokio::test]
    async fn test_create_rejects_missing_required_credential() {
        let uc = registry(MockAccountRepository::new(), MockScrapingJobRepository::new());
        let result = uc
            .create(
                "user-1",
                CreateAccountInput {
                    name: "Recruiting".into(),
                    credentials: linkedin("scout", ""),
                    config: None,
                },
            )
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(m)) if m.contains("password")));
    }

    #[tokio::test]
    async fn test_create_rejects_config_for_other_provider() {
        let uc = registry(MockAccountRepository::new(), MockScrapingJobRepository::new());
        let result = uc
            .create(
                "user-1",
                CreateAccountInput {
                    name: "CRM".into(),
                    credentials: CredentialBundle::Hubspot(HubSpotCredentials {
                        api_key: "key".into(),
                        portal_id: None,
                        access_token: None,
                        refresh_token: None,
                    }),
                    config: Some(ProviderConfig::Salesforce(SalesforceConfig::default())),
                },
            )
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_get_hides_other_users_accounts() {
        let account = stored_account("owner");
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        let uc = registry(accounts, MockScrapingJobRepository::new());

        assert!(uc.get("owner", id).await.is_ok());
        assert!(matches!(
            uc.get("intruder", id).await,
            Err(IntegrationError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_conflicts_while_job_running() {
        let account = stored_account("owner");
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts.expect_delete().never();

        let mut jobs = MockScrapingJobRepository::new();
        jobs.expect_list_by_account().returning(move |account_id| {
            let mut job = ScrapingJob::new(
                account_id,
                "owner".into(),
                JobType::ProfileSearch,
                JobConfig {
                    search_query: Some("cto".into()),
                    company_url: None,
                    profile_url: None,
                    max_results: 10,
                    filters: Default::default(),
                },
            );
            job.start();
            Ok(vec![job])
        });

        let uc = registry(accounts, jobs);
        assert!(matches!(
            uc.delete("owner", id).await,
            Err(IntegrationError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_removes_idle_account() {
        let account = stored_account("owner");
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts.expect_delete().returning(|_| Ok(true));
        let mut jobs = MockScrapingJobRepository::new();
        jobs.expect_list_by_account().returning(|_| Ok(vec![]));

        let uc = registry(accounts, jobs);
        assert!(uc.delete("owner", id).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_credentials_resets_to_testing() {
        let mut account = stored_account("owner");
        account.mark_probe_succeeded();
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts.expect_update().returning(|_| Ok(()));
        let uc = registry(accounts, MockScrapingJobRepository::new());

        let updated = uc
            .update(
                "owner",
                id,
                UpdateAccountInput {
                    credentials: Some(linkedin("new-scout", "pw2")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, AccountStatus::Testing);
        assert_eq!(updated.credential_hint.as_deref(), Some("new-scout"));
        let opened = uc.open_context(&updated).unwrap();
        assert_eq!(opened.credentials, linkedin("new-scout", "pw2"));
    }

    #[tokio::test]
    async fn test_update_rejects_out_of_range_daily_limit() {
        let account = stored_account("owner");
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        let uc = registry(accounts, MockScrapingJobRepository::new());

        let result = uc
            .update(
                "owner",
                id,
                UpdateAccountInput {
                    config: Some(ProviderConfig::Linkedin(ScrapingConfig {
                        daily_limit: 5000,
                        ..ScrapingConfig::default()
                    })),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_third_connector_failure_flips_to_error() {
        let mut account = stored_account("owner");
        account.mark_probe_succeeded();
        account.consecutive_failures = 2;
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts
            .expect_update()
            .withf(|a| a.status == AccountStatus::Error)
            .times(1)
            .returning(|_| Ok(()));
        let uc = registry(accounts, MockScrapingJobRepository::new());

        assert!(uc.record_connector_failure(id, "timeout").await.unwrap());
    }
}
