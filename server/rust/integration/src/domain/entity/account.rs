use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::provider_config::{ProviderConfig, ProviderStats};

/// Provider は連携先プロバイダの種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provider {
    Linkedin,
    Salesforce,
    Hubspot,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linkedin => "LINKEDIN",
            Self::Salesforce => "SALESFORCE",
            Self::Hubspot => "HUBSPOT",
        }
    }

    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "LINKEDIN" => Ok(Self::Linkedin),
            "SALESFORCE" => Ok(Self::Salesforce),
            "HUBSPOT" => Ok(Self::Hubspot),
            _ => anyhow::bail!("invalid provider: {}", s),
        }
    }

    pub fn is_crm(self) -> bool {
        matches!(self, Self::Salesforce | Self::Hubspot)
    }
}

/// AccountStatus はアカウントの状態を表す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountStatus {
    Active,
    Inactive,
    Error,
    Testing,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Inactive => write!(f, "INACTIVE"),
            Self::Error => write!(f, "ERROR"),
            Self::Testing => write!(f, "TESTING"),
        }
    }
}

impl AccountStatus {
    pub fn from_str_value(s: &str) -> anyhow::Result<Self> {
        match s {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            "ERROR" => Ok(Self::Error),
            "TESTING" => Ok(Self::Testing),
            _ => anyhow::bail!("invalid account status: {}", s),
        }
    }
}

/// EncryptedCredentials は AES-256-GCM で暗号化された認証情報（base64）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedCredentials {
    pub ciphertext: String,
    pub nonce: String,
}

const UNSPECIFIED_ERROR: &str = "provider reported an unspecified error";

/// Account は外部プロバイダのアカウント。認証情報は常に暗号化済みで保持する。
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: Uuid,
    pub user_id: String,
    pub provider: Provider,
    pub name: String,
    pub credentials: EncryptedCredentials,
    /// 画面表示用の非機密な識別子（ユーザー名・ポータル ID）。
    pub credential_hint: Option<String>,
    pub is_active: bool,
    pub status: AccountStatus,
    pub last_used_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub consecutive_failures: u32,
    pub config: ProviderConfig,
    pub stats: ProviderStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// 新規アカウントは接続検証待ちの TESTING で作成される。
    pub fn new(
        user_id: String,
        name: String,
        credentials: EncryptedCredentials,
        credential_hint: Option<String>,
        config: ProviderConfig,
    ) -> Self {
        let now = Utc::now();
        let provider = config.provider();
        Self {
            id: Uuid::new_v4(),
            user_id,
            provider,
            name,
            credentials,
            credential_hint,
            is_active: true,
            status: AccountStatus::Testing,
            last_used_at: None,
            error_message: None,
            consecutive_failures: 0,
            config,
            stats: ProviderStats::empty_for(provider),
            created_at: now,
            updated_at: now,
        }
    }

    /// スケジューラが選択できるのは有効かつ ACTIVE のアカウントのみ。
    pub fn is_schedulable(&self) -> bool {
        self.is_active && self.status == AccountStatus::Active
    }

    /// replace_credentials は認証情報を差し替え、再検証待ちに戻す。
    pub fn replace_credentials(&mut self, credentials: EncryptedCredentials, hint: Option<String>) {
        self.credentials = credentials;
        self.credential_hint = hint;
        self.status = AccountStatus::Testing;
        self.error_message = None;
        self.consecutive_failures = 0;
        self.updated_at = Utc::now();
    }

    /// mark_probe_succeeded は接続検証の成功を反映する。ERROR からの復帰はこの経路のみ。
    pub fn mark_probe_succeeded(&mut self) {
        self.status = if self.is_active {
            AccountStatus::Active
        } else {
            AccountStatus::Inactive
        };
        self.error_message = None;
        self.consecutive_failures = 0;
        self.updated_at = Utc::now();
    }

    /// mark_error は ERROR へ遷移させる。メッセージが空の場合も必ず非空の文言を残す。
    pub fn mark_error(&mut self, message: &str) {
        let message = message.trim();
        self.status = AccountStatus::Error;
        self.error_message = Some(if message.is_empty() {
            UNSPECIFIED_ERROR.to_string()
        } else {
            message.to_string()
        });
        self.updated_at = Utc::now();
    }

    /// record_connector_failure は連続失敗回数を加算し、閾値到達で ACTIVE → ERROR に遷移させる。
    /// 遷移した場合に true を返す。
    pub fn record_connector_failure(&mut self, message: &str, threshold: u32) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.updated_at = Utc::now();
        if self.status == AccountStatus::Active && self.consecutive_failures >= threshold.max(1) {
            self.mark_error(message);
            return true;
        }
        false
    }

    pub fn record_connector_success(&mut self, at: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.last_used_at = Some(at);
        self.updated_at = Utc::now();
    }

    /// toggle は有効フラグを反転する。ACTIVE / INACTIVE のみ状態も連動させ、
    /// TESTING と ERROR は接続検証の結果を待つ。
    pub fn toggle(&mut self) {
        self.is_active = !self.is_active;
        self.status = match (self.status, self.is_active) {
            (AccountStatus::Active, false) => AccountStatus::Inactive,
            (AccountStatus::Inactive, true) => AccountStatus::Active,
            (status, _) => status,
        };
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::new(
            "user-1".into(),
            "Sales Navigator".into(),
            EncryptedCredentials {
                ciphertext: "c".into(),
                nonce: "n".into(),
            },
            Some("scout@example.com".into()),
            ProviderConfig::default_for(Provider::Linkedin),
        )
    }

    #[test]
    fn test_new_account_is_testing() {
        let a = account();
        assert_eq!(a.status, AccountStatus::Testing);
        assert_eq!(a.provider, Provider::Linkedin);
        assert!(!a.is_schedulable());
    }

    #[test]
    fn test_three_consecutive_failures_move_active_to_error() {
        let mut a = account();
        a.mark_probe_succeeded();
        assert!(!a.record_connector_failure("timeout", 3));
        assert!(!a.record_connector_failure("timeout", 3));
        assert!(a.record_connector_failure("timeout", 3));
        assert_eq!(a.status, AccountStatus::Error);
        assert_eq!(a.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_success_resets_failure_counter() {
        let mut a = account();
        a.mark_probe_succeeded();
        a.record_connector_failure("timeout", 3);
        a.record_connector_failure("timeout", 3);
        a.record_connector_success(Utc::now());
        assert!(!a.record_connector_failure("timeout", 3));
        assert_eq!(a.status, AccountStatus::Active);
    }

    #[test]
    fn test_error_always_has_message() {
        let mut a = account();
        a.mark_error("   ");
        assert_eq!(a.status, AccountStatus::Error);
        assert!(!a.error_message.unwrap().is_empty());
    }

    #[test]
    fn test_toggle_links_active_and_inactive() {
        let mut a = account();
        a.mark_probe_succeeded();
        a.toggle();
        assert_eq!(a.status, AccountStatus::Inactive);
        assert!(!a.is_active);
        a.toggle();
        assert_eq!(a.status, AccountStatus::Active);

        a.mark_error("bad session");
        a.toggle();
        assert_eq!(a.status, AccountStatus::Error);
    }

    #[test]
    fn test_probe_success_on_disabled_account_is_inactive() {
        let mut a = account();
        a.is_active = false;
        a.mark_error("expired");
        a.mark_probe_succeeded();
        assert_eq!(a.status, AccountStatus::Inactive);
        assert_eq!(a.error_message, None);
    }

    #[test]
    fn test_status_round_trip_strings() {
        for s in ["ACTIVE", "INACTIVE", "ERROR", "TESTING"] {
            assert_eq!(AccountStatus::from_str_value(s).unwrap().to_string(), s);
        }
        assert!(Provider::from_str_value("linkedin").is_err());
    }
}
