//! プロバイダコネクタの抽象。
//!
//! 各プロバイダはデータ（認証情報と設定）とコネクタ実装の組で表し、実装は
//! プロバイダタグで `ConnectorRegistry` から選択する。コネクタが提供する操作は
//! `test_connection` / `fetch` / `push` の 3 つに限る。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use workloom_retry::{with_retry_if, RetryConfig, RetryError};

use crate::domain::entity::account::Provider;
use crate::domain::entity::credentials::CredentialBundle;
use crate::domain::entity::field_mapping::TargetRecord;
use crate::domain::entity::profile::DiscoveredRecord;
use crate::domain::entity::provider_config::ProviderConfig;
use crate::domain::entity::scraping_job::JobFilters;
use crate::domain::error::IntegrationError;

/// ConnectionContext はコネクタ呼び出しに必要な復号済みの接続情報。
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub account_id: Uuid,
    pub provider: Provider,
    pub credentials: CredentialBundle,
    pub config: ProviderConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProbe {
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub remaining_quota: Option<u32>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub session_expires_at: Option<DateTime<Utc>>,
}

/// ImportFilters は CRM からレコードを取り込む際の絞り込み条件。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportFilters {
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetchQuery {
    /// 検索結果 1 ページ分の候補を取得する。
    SearchPage {
        query: Option<String>,
        company_url: Option<String>,
        filters: JobFilters,
        cursor: Option<String>,
        page_size: u32,
    },
    /// 1 件のプロフィール詳細を取得する。
    Profile { url: String },
    Records {
        object: String,
        filters: ImportFilters,
        limit: Option<u32>,
    },
    /// 自然キーで既存レコードを 1 件探す。
    FindByKey {
        object: String,
        field: String,
        value: String,
    },
    /// CRM のレコード ID で 1 件取得する。
    FindById { object: String, id: String },
    Objects,
    ObjectFields { object: String },
    Workflows,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub external_id: String,
    pub profile_url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrmRecord {
    pub id: String,
    pub fields: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub name: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum FetchResult {
    SearchPage(SearchPage),
    Profile(DiscoveredRecord),
    Records(Vec<CrmRecord>),
    Record(Option<CrmRecord>),
    Objects(Vec<ObjectDescriptor>),
    Fields(Vec<FieldDescriptor>),
    Workflows(Vec<WorkflowDescriptor>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PushCommand {
    Create {
        object: String,
        fields: TargetRecord,
    },
    Update {
        object: String,
        id: String,
        fields: TargetRecord,
    },
    TriggerWorkflow {
        workflow_id: String,
        record_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    #[serde(default)]
    pub record_id: Option<String>,
}

/// ConnectorError はコネクタ呼び出しの失敗。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    #[error("{0}")]
    Timeout(String),
    #[error("provider rejected credentials: {0}")]
    Unauthorized(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
}

impl From<ConnectorError> for IntegrationError {
    fn from(e: ConnectorError) -> Self {
        match e {
            ConnectorError::Timeout(msg) => IntegrationError::ConnectionTimeout(msg),
            ConnectorError::Unauthorized(msg) => IntegrationError::Credential(msg),
            other => IntegrationError::Connector(other.to_string()),
        }
    }
}

macro_rules! expect_variant {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Result<$ty, ConnectorError> {
            match self {
                FetchResult::$variant(v) => Ok(v),
                other => Err(ConnectorError::InvalidResponse(format!(
                    "expected {}, got {}",
                    stringify!($variant),
                    other.kind()
                ))),
            }
        }
    };
}

impl FetchResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SearchPage(_) => "SearchPage",
            Self::Profile(_) => "Profile",
            Self::Records(_) => "Records",
            Self::Record(_) => "Record",
            Self::Objects(_) => "Objects",
            Self::Fields(_) => "Fields",
            Self::Workflows(_) => "Workflows",
        }
    }

    expect_variant!(into_search_page, SearchPage, SearchPage);
    expect_variant!(into_profile, Profile, DiscoveredRecord);
    expect_variant!(into_records, Records, Vec<CrmRecord>);
    expect_variant!(into_record, Record, Option<CrmRecord>);
    expect_variant!(into_objects, Objects, Vec<ObjectDescriptor>);
    expect_variant!(into_fields, Fields, Vec<FieldDescriptor>);
    expect_variant!(into_workflows, Workflows, Vec<WorkflowDescriptor>);
}

/// ProviderConnector はプロバイダ API への往復を担うケイパビリティ。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn test_connection(&self, ctx: &ConnectionContext)
        -> Result<ConnectionProbe, ConnectorError>;

    async fn fetch(
        &self,
        ctx: &ConnectionContext,
        query: FetchQuery,
    ) -> Result<FetchResult, ConnectorError>;

    async fn push(
        &self,
        ctx: &ConnectionContext,
        command: PushCommand,
    ) -> Result<PushOutcome, ConnectorError>;
}

/// ConnectorRegistry はプロバイダタグからコネクタ実装を引く。
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<Provider, Arc<dyn ProviderConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: Provider, connector: Arc<dyn ProviderConnector>) -> Self {
        self.connectors.insert(provider, connector);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ProviderConnector>, IntegrationError> {
        self.connectors.get(&provider).cloned().ok_or_else(|| {
            IntegrationError::Connector(format!("no connector configured for {provider}"))
        })
    }
}

/// CallPolicy はコネクタ呼び出しごとのタイムアウトと、タイムアウト時の再試行方針。
#[derive(Debug, Clone)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for CallPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
        }
    }
}

impl CallPolicy {
    /// run は operation をタイムアウト付きで実行する。タイムアウトのみ指数バックオフで再試行し、
    /// それ以外のエラーは即座に返す。
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ConnectorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectorError>>,
    {
        let timeout = self.timeout;
        let result = with_retry_if(
            &self.retry,
            || {
                let call = operation();
                async move {
                    match tokio::time::timeout(timeout, call).await {
                        Ok(r) => r,
                        Err(_) => Err(ConnectorError::Timeout(format!(
                            "provider call exceeded {} ms",
                            timeout.as_millis()
                        ))),
                    }
                }
            },
            |e| matches!(e, ConnectorError::Timeout(_)),
        )
        .await;

        result.map_err(|e| match e {
            RetryError::ExhaustedRetries {
                attempts,
                last_error: ConnectorError::Timeout(msg),
            } => ConnectorError::Timeout(format!("{msg} ({attempts} attempts)")),
            other => other.into_inner(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(100),
            retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(10))
                .with_jitter(false),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_are_retried_then_surfaced() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), ConnectorError> = policy()
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(ConnectorError::Timeout(msg)) => assert!(msg.contains("3 attempts")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_timeout_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), ConnectorError> = policy()
            .run(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(ConnectorError::Unauthorized("expired session".into()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            IntegrationError::from(result.unwrap_err()),
            IntegrationError::Credential("expired session".into())
        );
    }

    #[test]
    fn test_fetch_result_variant_mismatch() {
        let err = FetchResult::Objects(vec![]).into_records().unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidResponse(_)));
    }

    #[test]
    fn test_registry_reports_missing_connector() {
        let registry = ConnectorRegistry::new();
        assert!(matches!(
            registry.get(Provider::Hubspot),
            Err(IntegrationError::Connector(_))
        ));
    }
}
