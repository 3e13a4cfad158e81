use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entity::account::Account;
use crate::domain::error::IntegrationError;
use crate::infrastructure::connector::{CallPolicy, ConnectorRegistry};
use crate::usecase::account_registry::AccountRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionDetails {
    pub response_time_ms: u64,
    pub remaining_quota: Option<u32>,
    pub api_version: Option<String>,
    pub permissions: Vec<String>,
    pub session_expires_at: Option<DateTime<Utc>>,
}

/// ConnectionTestResult は接続検証の結果。失敗もエラーではなく結果として返す。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
    pub details: Option<ConnectionDetails>,
}

/// ConnectionValidator はプロバイダへの軽量な往復でアカウントの認証情報を検証する。
///
/// 冪等であり、スクレイピングジョブと並行して実行してよい。アカウント状態の書き込みは後勝ち。
pub struct ConnectionValidator {
    registry: Arc<AccountRegistry>,
    connectors: ConnectorRegistry,
    policy: CallPolicy,
}

impl ConnectionValidator {
    pub fn new(
        registry: Arc<AccountRegistry>,
        connectors: ConnectorRegistry,
        policy: CallPolicy,
    ) -> Self {
        Self {
            registry,
            connectors,
            policy,
        }
    }

    pub async fn test(
        &self,
        user_id: &str,
        account_id: Uuid,
    ) -> Result<ConnectionTestResult, IntegrationError> {
        let account = self.registry.get(user_id, account_id).await?;
        self.probe(account).await
    }

    /// probe は取得済みのアカウントを検証し、結果に応じて状態を更新する。
    pub async fn probe(&self, mut account: Account) -> Result<ConnectionTestResult, IntegrationError> {
        let started = tokio::time::Instant::now();
        let outcome = match self.registry.open_context(&account) {
            Ok(ctx) => {
                let connector = self.connectors.get(account.provider)?;
                self.policy
                    .run(|| connector.test_connection(&ctx))
                    .await
                    .map_err(IntegrationError::from)
            }
            Err(e) => Err(e),
        };
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let result = match outcome {
            Ok(probe) => {
                account.mark_probe_succeeded();
                account.last_used_at = Some(Utc::now());
                tracing::info!(account_id = %account.id, status = %account.status, "connection test succeeded");
                ConnectionTestResult {
                    success: true,
                    message: format!("connected to {}", account.provider),
                    details: Some(ConnectionDetails {
                        response_time_ms: elapsed,
                        remaining_quota: probe.remaining_quota,
                        api_version: probe.api_version,
                        permissions: probe.permissions,
                        session_expires_at: probe.session_expires_at,
                    }),
                }
            }
            Err(e) => {
                let message = e.to_string();
                account.mark_error(&message);
                tracing::warn!(account_id = %account.id, error = %message, "connection test failed");
                ConnectionTestResult {
                    success: false,
                    message,
                    details: None,
                }
            }
        };

        self.registry.save(&account).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::account::{AccountStatus, Provider};
    use crate::domain::entity::credentials::{CredentialBundle, HubSpotCredentials};
    use crate::domain::entity::provider_config::ProviderConfig;
    use crate::domain::repository::account_repository::MockAccountRepository;
    use crate::domain::repository::scraping_job_repository::MockScrapingJobRepository;
    use crate::infrastructure::account_guard::AccountWorkGuard;
    use crate::infrastructure::clock::SystemClock;
    use crate::infrastructure::connector::{ConnectionProbe, ConnectorError, MockProviderConnector};
    use crate::infrastructure::credential_vault::{CredentialVault, MasterKey};
    use crate::infrastructure::rate_limiter::RateLimiter;

    fn hubspot_account(vault: &CredentialVault) -> Account {
        let bundle = CredentialBundle::Hubspot(HubSpotCredentials {
            api_key: "pat-123".into(),
            portal_id: Some("4711".into()),
            access_token: None,
            refresh_token: None,
        });
        let mut account = Account::new(
            "owner".into(),
            "HubSpot".into(),
            vault.seal(&bundle).unwrap(),
            bundle.hint(),
            ProviderConfig::default_for(Provider::Hubspot),
        );
        account.mark_error("expired token");
        account
    }

    fn validator(
        account: Account,
        expected_status: AccountStatus,
        connector: MockProviderConnector,
    ) -> ConnectionValidator {
        let vault = Arc::new(CredentialVault::new(MasterKey::from_hex(&"22".repeat(32)).unwrap()));
        let mut accounts = MockAccountRepository::new();
        accounts
            .expect_find_by_id()
            .returning(move |_| Ok(Some(account.clone())));
        accounts
            .expect_update()
            .withf(move |a| a.status == expected_status)
            .times(1)
            .returning(|_| Ok(()));
        let registry = Arc::new(AccountRegistry::new(
            Arc::new(accounts),
            Arc::new(MockScrapingJobRepository::new()),
            vault,
            Arc::new(RateLimiter::new(Arc::new(SystemClock), chrono_tz::UTC)),
            AccountWorkGuard::new(),
            3,
        ));
        ConnectionValidator::new(
            registry,
            ConnectorRegistry::new().with(Provider::Hubspot, Arc::new(connector)),
            CallPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_success_clears_error_state() {
        let vault = CredentialVault::new(MasterKey::from_hex(&"22".repeat(32)).unwrap());
        let account = hubspot_account(&vault);
        let id = account.id;
        let mut connector = MockProviderConnector::new();
        connector.expect_test_connection().returning(|_| {
            Ok(ConnectionProbe {
                api_version: Some("v3".into()),
                remaining_quota: Some(250),
                permissions: vec!["crm.objects.contacts.write".into()],
                session_expires_at: None,
            })
        });

        let result = validator(account, AccountStatus::Active, connector)
            .test("owner", id)
            .await
            .unwrap();
        assert!(result.success);
        let details = result.details.unwrap();
        assert_eq!(details.remaining_quota, Some(250));
    }

    #[tokio::test]
    async fn test_failure_moves_account_to_error_with_message() {
        let vault = CredentialVault::new(MasterKey::from_hex(&"22".repeat(32)).unwrap());
        let mut account = hubspot_account(&vault);
        account.mark_probe_succeeded();
        let id = account.id;
        let mut connector = MockProviderConnector::new();
        connector
            .expect_test_connection()
            .returning(|_| Err(ConnectorError::Unauthorized("invalid api key".into())));

        let result = validator(account, AccountStatus::Error, connector)
            .test("owner", id)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message.contains("invalid api key"));
        assert!(result.details.is_none());
    }
}
