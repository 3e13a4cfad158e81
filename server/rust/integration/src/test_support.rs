//! 統合テスト用の組み立て部品。
//!
//! すべてインメモリで動作し、プロバイダ呼び出しは `FakeConnector` が応答する。

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use workloom_telemetry::metrics::Metrics;

use crate::adapter::handler::AppState;
use crate::domain::entity::account::{Account, Provider};
use crate::domain::entity::credentials::{
    CredentialBundle, HubSpotCredentials, LinkedInCredentials, SalesforceCredentials,
};
use crate::domain::entity::profile::DiscoveredRecord;
use crate::domain::entity::provider_config::{ProviderConfig, ScrapingConfig};
use crate::domain::error::IntegrationError;
use crate::infrastructure::account_guard::AccountWorkGuard;
use crate::infrastructure::clock::{Clock, SystemClock};
use crate::infrastructure::connector::{
    Candidate, CallPolicy, ConnectionContext, ConnectionProbe, ConnectorError, ConnectorRegistry,
    CrmRecord, FetchQuery, FetchResult, FieldDescriptor, ObjectDescriptor, ProviderConnector,
    PushCommand, PushOutcome, SearchPage, WorkflowDescriptor,
};
use crate::infrastructure::credential_vault::{CredentialVault, MasterKey};
use crate::infrastructure::rate_limiter::RateLimiter;
use crate::usecase::account_registry::CreateAccountInput;
use crate::usecase::mapping_run_engine::MappingRunSettings;
use crate::usecase::scraping_job_scheduler::SchedulerSettings;
use crate::usecase::{
    AccountRegistry, ConnectionValidator, LinkedInService, MappingRunEngine, MappingService,
    ScrapingJobScheduler, SyncReconciler,
};

pub use crate::adapter::repository::{
    InMemoryAccountRepository, InMemoryMappingRepository, InMemoryMappingRunRepository,
    InMemoryProfileRepository, InMemoryScrapingJobRepository, InMemorySyncOperationRepository,
};

const TEST_MASTER_KEY: &str = "5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a5a";

#[derive(Default)]
struct FakeState {
    /// 検索結果として返す人物（登場順）。
    people: Vec<DiscoveredRecord>,
    failing_profile_urls: HashSet<String>,
    probe_error: Option<String>,
    fetch_delay: Option<Duration>,
    crm_records: Vec<CrmRecord>,
    next_crm_id: u64,
    /// この値をフィールドに含む書き込みは拒否される。
    rejected_values: HashSet<String>,
    records_error: Option<String>,
    pushes: Vec<PushCommand>,
    fetches: u64,
}

/// FakeConnector はスクリプト可能なプロバイダ実装。
///
/// LinkedIn 側は `people` を検索結果・プロフィール詳細として返し、CRM 側は
/// 書き込まれたレコードを保持するので、同じ内容の再エクスポートは更新なしになる。
#[derive(Default)]
pub struct FakeConnector {
    state: Mutex<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_people(&self, people: Vec<DiscoveredRecord>) {
        self.state.lock().await.people = people;
    }

    pub async fn fail_profile(&self, profile_url: &str) {
        self.state
            .lock()
            .await
            .failing_profile_urls
            .insert(profile_url.to_string());
    }

    pub async fn fail_probe(&self, message: &str) {
        self.state.lock().await.probe_error = Some(message.to_string());
    }

    pub async fn set_fetch_delay(&self, delay: Duration) {
        self.state.lock().await.fetch_delay = Some(delay);
    }

    pub async fn reject_value(&self, value: &str) {
        self.state
            .lock()
            .await
            .rejected_values
            .insert(value.to_string());
    }

    pub async fn fail_records(&self, message: &str) {
        self.state.lock().await.records_error = Some(message.to_string());
    }

    pub async fn add_crm_record(&self, id: &str, fields: BTreeMap<String, serde_json::Value>) {
        self.state.lock().await.crm_records.push(CrmRecord {
            id: id.to_string(),
            fields,
            modified_at: None,
        });
    }

    pub async fn crm_records(&self) -> Vec<CrmRecord> {
        self.state.lock().await.crm_records.clone()
    }

    pub async fn pushes(&self) -> Vec<PushCommand> {
        self.state.lock().await.pushes.clone()
    }

    pub async fn created_count(&self) -> usize {
        self.state
            .lock()
            .await
            .pushes
            .iter()
            .filter(|p| matches!(p, PushCommand::Create { .. }))
            .count()
    }

    pub async fn fetch_count(&self) -> u64 {
        self.state.lock().await.fetches
    }

    fn search(state: &FakeState, cursor: Option<&str>, page_size: u32) -> SearchPage {
        let start: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
        let end = (start + page_size as usize).min(state.people.len());
        let candidates = state.people[start.min(end)..end]
            .iter()
            .map(|p| Candidate {
                external_id: p.external_id.clone(),
                profile_url: p.profile_url.clone().unwrap_or_default(),
                name: Some(p.name.clone()),
            })
            .collect();
        SearchPage {
            candidates,
            next_cursor: (end < state.people.len()).then(|| end.to_string()),
        }
    }
}

fn value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl ProviderConnector for FakeConnector {
    async fn test_connection(
        &self,
        _ctx: &ConnectionContext,
    ) -> Result<ConnectionProbe, ConnectorError> {
        let state = self.state.lock().await;
        match &state.probe_error {
            Some(message) => Err(ConnectorError::Unauthorized(message.clone())),
            None => Ok(ConnectionProbe {
                api_version: Some("fake-1".into()),
                remaining_quota: None,
                permissions: vec!["read".into(), "write".into()],
                session_expires_at: None,
            }),
        }
    }

    async fn fetch(
        &self,
        _ctx: &ConnectionContext,
        query: FetchQuery,
    ) -> Result<FetchResult, ConnectorError> {
        let delay = {
            let mut state = self.state.lock().await;
            state.fetches += 1;
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().await;
        match query {
            FetchQuery::SearchPage {
                cursor, page_size, ..
            } => Ok(FetchResult::SearchPage(Self::search(
                &state,
                cursor.as_deref(),
                page_size,
            ))),
            FetchQuery::Profile { url } => {
                if state.failing_profile_urls.contains(&url) {
                    return Err(ConnectorError::Provider(format!("profile unavailable: {url}")));
                }
                state
                    .people
                    .iter()
                    .find(|p| p.profile_url.as_deref() == Some(url.as_str()))
                    .cloned()
                    .map(FetchResult::Profile)
                    .ok_or_else(|| ConnectorError::Provider(format!("no profile at {url}")))
            }
            FetchQuery::Records { limit, .. } => {
                if let Some(message) = &state.records_error {
                    return Err(ConnectorError::Provider(message.clone()));
                }
                let mut records = state.crm_records.clone();
                if let Some(limit) = limit {
                    records.truncate(limit as usize);
                }
                Ok(FetchResult::Records(records))
            }
            FetchQuery::FindByKey { field, value, .. } => Ok(FetchResult::Record(
                state
                    .crm_records
                    .iter()
                    .find(|r| {
                        r.fields.get(&field).and_then(value_to_string).as_deref()
                            == Some(value.as_str())
                    })
                    .cloned(),
            )),
            FetchQuery::FindById { id, .. } => Ok(FetchResult::Record(
                state.crm_records.iter().find(|r| r.id == id).cloned(),
            )),
            FetchQuery::Objects => Ok(FetchResult::Objects(vec![
                ObjectDescriptor {
                    name: "Lead".into(),
                    label: "Lead".into(),
                },
                ObjectDescriptor {
                    name: "Contact".into(),
                    label: "Contact".into(),
                },
            ])),
            FetchQuery::ObjectFields { object } => Ok(FetchResult::Fields(vec![FieldDescriptor {
                name: "LastName".into(),
                label: format!("{object} Last Name"),
                field_type: "string".into(),
                required: true,
            }])),
            FetchQuery::Workflows => Ok(FetchResult::Workflows(vec![WorkflowDescriptor {
                id: "wf-1".into(),
                name: "Welcome sequence".into(),
                enabled: true,
            }])),
        }
    }

    async fn push(
        &self,
        _ctx: &ConnectionContext,
        command: PushCommand,
    ) -> Result<PushOutcome, ConnectorError> {
        let mut state = self.state.lock().await;
        let fields = match &command {
            PushCommand::Create { fields, .. } | PushCommand::Update { fields, .. } => Some(fields),
            PushCommand::TriggerWorkflow { .. } => None,
        };
        if let Some(fields) = fields {
            if fields.values().any(|v| state.rejected_values.contains(v)) {
                return Err(ConnectorError::Provider("record rejected by provider".into()));
            }
        }

        let record_id = match &command {
            PushCommand::Create { fields, .. } => {
                state.next_crm_id += 1;
                let id = format!("crm-{}", state.next_crm_id);
                state.crm_records.push(CrmRecord {
                    id: id.clone(),
                    fields: fields
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                        .collect(),
                    modified_at: None,
                });
                Some(id)
            }
            PushCommand::Update { id, fields, .. } => {
                let Some(record) = state.crm_records.iter_mut().find(|r| &r.id == id) else {
                    return Err(ConnectorError::Provider(format!("record {id} not found")));
                };
                for (k, v) in fields {
                    record
                        .fields
                        .insert(k.clone(), serde_json::Value::String(v.clone()));
                }
                Some(id.clone())
            }
            PushCommand::TriggerWorkflow { record_id, .. } => Some(record_id.clone()),
        };
        state.pushes.push(command);
        Ok(PushOutcome { record_id })
    }
}

/// TestHarness はインメモリ構成のアプリケーション一式。
pub struct TestHarness {
    pub state: AppState,
    pub connector: Arc<FakeConnector>,
    pub limiter: Arc<RateLimiter>,
    /// 前回プロセスの取り残しを再現するために直接書き込む。
    pub run_repo: Arc<InMemoryMappingRunRepository>,
}

/// build_harness は指定のコネクタを全プロバイダに登録した状態を組み立てる。
pub fn build_harness(
    connector: Arc<FakeConnector>,
    max_concurrent_jobs: usize,
) -> anyhow::Result<TestHarness> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let vault = Arc::new(CredentialVault::new(MasterKey::from_hex(TEST_MASTER_KEY)?));
    let limiter = Arc::new(RateLimiter::new(clock.clone(), chrono_tz::UTC));
    let guard = AccountWorkGuard::new();
    let metrics = Arc::new(Metrics::new("integration-test"));
    let connectors = ConnectorRegistry::new()
        .with(Provider::Linkedin, connector.clone())
        .with(Provider::Salesforce, connector.clone())
        .with(Provider::Hubspot, connector.clone());
    let policy = CallPolicy {
        timeout: Duration::from_secs(5),
        ..CallPolicy::default()
    };

    let account_repo = Arc::new(InMemoryAccountRepository::new());
    let job_repo = Arc::new(InMemoryScrapingJobRepository::new());
    let mapping_repo = Arc::new(InMemoryMappingRepository::new());
    let run_repo = Arc::new(InMemoryMappingRunRepository::new());
    let profile_repo = Arc::new(InMemoryProfileRepository::new());
    let sync_repo = Arc::new(InMemorySyncOperationRepository::new());

    let accounts = Arc::new(AccountRegistry::new(
        account_repo,
        job_repo.clone(),
        vault,
        limiter.clone(),
        guard.clone(),
        3,
    ));
    let validator = Arc::new(ConnectionValidator::new(
        accounts.clone(),
        connectors.clone(),
        policy.clone(),
    ));
    let scheduler = Arc::new(ScrapingJobScheduler::new(
        accounts.clone(),
        job_repo,
        limiter.clone(),
        connectors.clone(),
        guard.clone(),
        clock.clone(),
        metrics.clone(),
        policy.clone(),
        SchedulerSettings {
            max_concurrent_jobs,
            ..SchedulerSettings::default()
        },
    ));
    let linkedin = Arc::new(LinkedInService::new(
        accounts.clone(),
        validator.clone(),
        limiter.clone(),
        connectors.clone(),
        clock.clone(),
        metrics.clone(),
        policy.clone(),
    ));
    let sync = Arc::new(SyncReconciler::new(
        accounts.clone(),
        mapping_repo.clone(),
        profile_repo.clone(),
        sync_repo,
        connectors,
        guard,
        clock.clone(),
        metrics.clone(),
        policy,
    ));
    let mappings = Arc::new(MappingService::new(
        mapping_repo.clone(),
        run_repo.clone(),
        profile_repo.clone(),
        clock.clone(),
    ));
    let runs = Arc::new(MappingRunEngine::new(
        mapping_repo,
        run_repo.clone(),
        profile_repo,
        accounts.clone(),
        scheduler.clone(),
        limiter.clone(),
        clock,
        metrics.clone(),
        MappingRunSettings::default(),
    ));

    Ok(TestHarness {
        state: AppState {
            accounts,
            validator,
            scheduler,
            linkedin,
            sync,
            mappings,
            runs,
            metrics,
            db_pool: None,
        },
        connector,
        limiter,
        run_repo,
    })
}

/// make_test_app_state は既定のフェイクコネクタで AppState を作る。
pub fn make_test_app_state() -> anyhow::Result<AppState> {
    Ok(build_harness(FakeConnector::new(), 8)?.state)
}

pub fn linkedin_credentials(username: &str) -> CredentialBundle {
    CredentialBundle::Linkedin(LinkedInCredentials {
        username: username.to_string(),
        password: "hunter2".into(),
        cookies: None,
        session_token: None,
        csrf_token: None,
        user_agent: None,
        proxy: None,
    })
}

pub fn salesforce_credentials() -> CredentialBundle {
    CredentialBundle::Salesforce(SalesforceCredentials {
        username: "ops@example.com".into(),
        security_token: "tok".into(),
        client_id: None,
        client_secret: None,
        instance_url: Some("https://example.my.salesforce.com".into()),
        access_token: None,
        refresh_token: None,
    })
}

pub fn hubspot_credentials() -> CredentialBundle {
    CredentialBundle::Hubspot(HubSpotCredentials {
        api_key: "pat-na1-test".into(),
        portal_id: Some("4711".into()),
        access_token: None,
        refresh_token: None,
    })
}

/// fast_linkedin_config は呼び出し間隔の待機を無効にした LinkedIn 設定。
pub fn fast_linkedin_config(daily_limit: u32) -> ProviderConfig {
    ProviderConfig::Linkedin(ScrapingConfig {
        daily_limit,
        request_delay_ms: 1000,
        enable_rotation: false,
        respect_rate_limits: false,
    })
}

/// active_account はアカウントを作成し、接続検証を通して ACTIVE にする。
pub async fn active_account(
    state: &AppState,
    user_id: &str,
    credentials: CredentialBundle,
    config: Option<ProviderConfig>,
) -> Result<Account, IntegrationError> {
    let account = state
        .accounts
        .create(
            user_id,
            CreateAccountInput {
                name: "test account".into(),
                credentials,
                config,
            },
        )
        .await?;
    state.validator.test(user_id, account.id).await?;
    state.accounts.get(user_id, account.id).await
}

/// person はテスト用の観測値を作る。プロフィール URL は外部 ID から導出する。
pub fn person(external_id: &str, name: &str, job_title: &str, company: &str) -> DiscoveredRecord {
    DiscoveredRecord {
        external_id: external_id.to_string(),
        name: name.to_string(),
        job_title: Some(job_title.to_string()),
        company: Some(company.to_string()),
        location: Some("Berlin, Germany".into()),
        profile_url: Some(format!("https://www.linkedin.com/in/{external_id}")),
        image_url: None,
    }
}
