use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;
use workloom_telemetry::metrics::Metrics;

use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::profile::DiscoveredRecord;
use crate::domain::entity::provider_config::{
    LinkedInStats, ProviderConfig, ProviderStats, ScrapingConfig,
};
use crate::domain::entity::scraping_job::{require_url, JobFilters};
use crate::domain::error::IntegrationError;
use crate::infrastructure::clock::Clock;
use crate::infrastructure::connector::{
    CallPolicy, ConnectorRegistry, FetchQuery, FetchResult, SearchPage,
};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::usecase::account_registry::AccountRegistry;
use crate::usecase::connection_validator::ConnectionValidator;

pub const DEFAULT_SEARCH_PAGE_SIZE: u32 = 25;
pub const MAX_SEARCH_PAGE_SIZE: u32 = 100;

/// LinkedInStatsView は永続化済みの統計にレートリミッターの当日残量を重ねたもの。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkedInStatsView {
    #[serde(flatten)]
    pub stats: LinkedInStats,
    pub daily_limit: u32,
    pub remaining_today: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionValidation {
    pub valid: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchProfilesInput {
    pub query: String,
    pub filters: JobFilters,
    pub page_size: Option<u32>,
    pub cursor: Option<String>,
}

/// LinkedInService は LinkedIn アカウント固有の操作（統計・設定・セッション検証・単発の発見処理）を提供する。
///
/// 単発の発見処理もジョブと同じくレートリミッターの単位を消費する。
pub struct LinkedInService {
    registry: Arc<AccountRegistry>,
    validator: Arc<ConnectionValidator>,
    limiter: Arc<RateLimiter>,
    connectors: ConnectorRegistry,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    policy: CallPolicy,
}

impl LinkedInService {
    pub fn new(
        registry: Arc<AccountRegistry>,
        validator: Arc<ConnectionValidator>,
        limiter: Arc<RateLimiter>,
        connectors: ConnectorRegistry,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
        policy: CallPolicy,
    ) -> Self {
        Self {
            registry,
            validator,
            limiter,
            connectors,
            clock,
            metrics,
            policy,
        }
    }

    async fn linkedin_account(&self, user_id: &str, id: Uuid) -> Result<Account, IntegrationError> {
        let account = self.registry.get(user_id, id).await?;
        if account.provider != Provider::Linkedin {
            return Err(IntegrationError::validation(format!(
                "account {id} is not a LinkedIn account"
            )));
        }
        Ok(account)
    }

    pub async fn get_stats(&self, user_id: &str, id: Uuid) -> Result<LinkedInStatsView, IntegrationError> {
        let account = self.linkedin_account(user_id, id).await?;
        self.registry.sync_limiter(&account).await;
        let snapshot = self.limiter.snapshot(account.id).await;
        let stats = match account.stats {
            ProviderStats::Linkedin(s) => s,
            _ => LinkedInStats::default(),
        };
        let daily_limit = account.config.scraping().map_or(0, |c| c.daily_limit);
        Ok(LinkedInStatsView {
            stats,
            daily_limit: snapshot.map_or(daily_limit, |s| s.daily_limit),
            remaining_today: snapshot.map_or(daily_limit, |s| s.remaining),
            reset_at: snapshot.map(|s| s.reset_at),
        })
    }

    /// update_config はスクレイピング設定を検証して保存し、レートリミッターへ即時反映する。
    pub async fn update_config(
        &self,
        user_id: &str,
        id: Uuid,
        config: ScrapingConfig,
    ) -> Result<Account, IntegrationError> {
        config.validate()?;
        let mut account = self.linkedin_account(user_id, id).await?;
        account.config = ProviderConfig::Linkedin(config);
        account.updated_at = self.clock.now();
        self.registry.save(&account).await?;
        self.registry.sync_limiter(&account).await;
        tracing::info!(account_id = %account.id, "scraping config updated");
        Ok(account)
    }

    /// validate_session はセッションを検証する。無効な場合は接続テスト失敗と同様に ERROR となる。
    pub async fn validate_session(
        &self,
        user_id: &str,
        id: Uuid,
    ) -> Result<SessionValidation, IntegrationError> {
        let account = self.linkedin_account(user_id, id).await?;
        let result = self.validator.probe(account).await?;
        Ok(SessionValidation {
            valid: result.success,
            expires_at: result.details.and_then(|d| d.session_expires_at),
        })
    }

    /// get_profile は 1 件のプロフィール詳細を取得する。1 単位を消費する。
    pub async fn get_profile(
        &self,
        user_id: &str,
        id: Uuid,
        profile_url: &str,
    ) -> Result<DiscoveredRecord, IntegrationError> {
        require_url("profile_url", Some(&profile_url.to_string()))?;
        let account = self.acquire(user_id, id).await?;
        let query = FetchQuery::Profile {
            url: profile_url.trim().to_string(),
        };
        let result = self.call(&account, query).await;
        let record = result.and_then(|r| r.into_profile().map_err(IntegrationError::from));
        self.finish(&account, record.is_ok()).await?;
        record.map(DiscoveredRecord::normalized)
    }

    /// search_profiles は検索結果を 1 ページ取得する。1 単位を消費する。
    pub async fn search_profiles(
        &self,
        user_id: &str,
        id: Uuid,
        input: SearchProfilesInput,
    ) -> Result<SearchPage, IntegrationError> {
        if input.query.trim().is_empty() {
            return Err(IntegrationError::validation("query is required"));
        }
        let page_size = input.page_size.unwrap_or(DEFAULT_SEARCH_PAGE_SIZE);
        if !(1..=MAX_SEARCH_PAGE_SIZE).contains(&page_size) {
            return Err(IntegrationError::validation(format!(
                "page_size must be between 1 and {MAX_SEARCH_PAGE_SIZE}"
            )));
        }
        let account = self.acquire(user_id, id).await?;
        let query = FetchQuery::SearchPage {
            query: Some(input.query.trim().to_string()),
            company_url: None,
            filters: input.filters,
            cursor: input.cursor,
            page_size,
        };
        let page = self
            .call(&account, query)
            .await
            .and_then(|r| r.into_search_page().map_err(IntegrationError::from));
        self.finish(&account, page.is_ok()).await?;
        page
    }

    /// acquire は呼び出しに使うアカウントを決めて 1 単位を確保する。
    /// ローテーション有効時は同じユーザーの利用可能な LinkedIn アカウントから選ぶ。
    async fn acquire(&self, user_id: &str, id: Uuid) -> Result<Account, IntegrationError> {
        let account = self.linkedin_account(user_id, id).await?;
        if !account.is_schedulable() {
            return Err(IntegrationError::AccountUnavailable(format!(
                "account {} is not available (status {}, active {})",
                account.id, account.status, account.is_active
            )));
        }
        let rotation = account.config.scraping().is_some_and(|c| c.enable_rotation);
        let result = if rotation {
            self.acquire_rotating(user_id, account).await
        } else {
            self.registry.sync_limiter(&account).await;
            self.limiter.acquire(account.id).await.map(|()| account)
        };
        self.metrics
            .record_rate_limit(if result.is_ok() { "granted" } else { "rejected" });
        result
    }

    async fn acquire_rotating(
        &self,
        user_id: &str,
        preferred: Account,
    ) -> Result<Account, IntegrationError> {
        let mut pool: Vec<Account> = self
            .registry
            .list(user_id)
            .await?
            .into_iter()
            .filter(|a| a.provider == Provider::Linkedin && a.id != preferred.id)
            .filter(Account::is_schedulable)
            .collect();
        pool.insert(0, preferred);
        for account in &pool {
            self.registry.sync_limiter(account).await;
        }
        let ids: Vec<Uuid> = pool.iter().map(|a| a.id).collect();
        let chosen = self
            .limiter
            .acquire_rotating(&format!("{user_id}:linkedin"), &ids)
            .await?;
        pool.into_iter()
            .find(|a| a.id == chosen)
            .ok_or_else(|| IntegrationError::Internal("rotation picked an unknown account".into()))
    }

    async fn call(
        &self,
        account: &Account,
        query: FetchQuery,
    ) -> Result<FetchResult, IntegrationError> {
        let ctx = self.registry.open_context(account)?;
        let connector = self.connectors.get(account.provider)?;
        Ok(self
            .policy
            .run(|| connector.fetch(&ctx, query.clone()))
            .await?)
    }

    /// finish は呼び出し結果をアカウントの失敗カウンタと統計へ反映する。
    async fn finish(&self, account: &Account, ok: bool) -> Result<(), IntegrationError> {
        let now = self.clock.now();
        if ok {
            if account.consecutive_failures > 0 {
                self.registry.record_connector_success(account.id, now).await?;
            }
            self.registry.record_job_outcome(account.id, 1, 0, now).await
        } else {
            self.registry
                .record_connector_failure(account.id, "ad-hoc LinkedIn request failed")
                .await?;
            self.registry.record_job_outcome(account.id, 0, 1, now).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::credentials::{CredentialBundle, LinkedInCredentials};
    use crate::domain::repository::account_repository::MockAccountRepository;
    use crate::domain::repository::scraping_job_repository::MockScrapingJobRepository;
    use crate::infrastructure::account_guard::AccountWorkGuard;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::connector::MockProviderConnector;
    use crate::infrastructure::credential_vault::{CredentialVault, MasterKey};

    fn vault() -> Arc<CredentialVault> {
        Arc::new(CredentialVault::new(
            MasterKey::from_hex(&"44".repeat(32)).unwrap(),
        ))
    }

    fn linkedin_account(daily_limit: u32) -> Account {
        let bundle = CredentialBundle::Linkedin(LinkedInCredentials {
            username: "scout".into(),
            password: "pw".into(),
            cookies: None,
            session_token: None,
            csrf_token: None,
            user_agent: None,
            proxy: None,
        });
        let mut account = Account::new(
            "owner".into(),
            "scout".into(),
            vault().seal(&bundle).unwrap(),
            bundle.hint(),
            ProviderConfig::Linkedin(ScrapingConfig {
                daily_limit,
                respect_rate_limits: false,
                ..ScrapingConfig::default()
            }),
        );
        account.mark_probe_succeeded();
        account
    }

    fn service(accounts: MockAccountRepository, connector: MockProviderConnector) -> LinkedInService {
        let limiter = Arc::new(RateLimiter::new(Arc::new(SystemClock), chrono_tz::UTC));
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(accounts),
            Arc::new(MockScrapingJobRepository::new()),
            vault(),
            limiter.clone(),
            AccountWorkGuard::new(),
            3,
        ));
        let connectors = ConnectorRegistry::new().with(Provider::Linkedin, Arc::new(connector));
        let validator = Arc::new(ConnectionValidator::new(
            registry.clone(),
            connectors.clone(),
            CallPolicy::default(),
        ));
        LinkedInService::new(
            registry,
            validator,
            limiter,
            connectors,
            Arc::new(SystemClock),
            Arc::new(Metrics::new("test")),
            CallPolicy::default(),
        )
    }

    fn record() -> DiscoveredRecord {
        DiscoveredRecord {
            external_id: "li-7".into(),
            name: " Ada Lovelace ".into(),
            job_title: Some("Analyst".into()),
            company: None,
            location: None,
            profile_url: Some("https://www.linkedin.com/in/ada".into()),
            image_url: None,
        }
    }

    #[tokio::test]
    async fn test_get_profile_consumes_quota() {
        let account = linkedin_account(1);
        let id = account.id;
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts.expect_update().returning(|_| Ok(()));
        let mut connector = MockProviderConnector::new();
        connector
            .expect_fetch()
            .times(1)
            .returning(|_, _| Ok(FetchResult::Profile(record())));
        let svc = service(accounts, connector);

        let profile = svc
            .get_profile("owner", id, "https://www.linkedin.com/in/ada")
            .await
            .unwrap();
        assert_eq!(profile.name, "Ada Lovelace");

        let second = svc
            .get_profile("owner", id, "https://www.linkedin.com/in/ada")
            .await;
        assert!(matches!(second, Err(IntegrationError::QuotaExceeded { .. })));

        let stats = svc.get_stats("owner", id).await.unwrap();
        assert_eq!(stats.remaining_today, 0);
        assert!(stats.reset_at.is_some());
    }

    #[tokio::test]
    async fn test_update_config_rejects_out_of_range_limit() {
        let svc = service(MockAccountRepository::new(), MockProviderConnector::new());
        let result = svc
            .update_config(
                "owner",
                Uuid::new_v4(),
                ScrapingConfig {
                    daily_limit: 5000,
                    ..ScrapingConfig::default()
                },
            )
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }

    #[tokio::test]
    async fn test_search_requires_query() {
        let svc = service(MockAccountRepository::new(), MockProviderConnector::new());
        let result = svc
            .search_profiles("owner", Uuid::new_v4(), SearchProfilesInput::default())
            .await;
        assert!(matches!(result, Err(IntegrationError::Validation(_))));
    }
}
