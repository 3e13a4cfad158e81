use serde::{Deserialize, Serialize};

use super::account::Provider;
use crate::domain::error::IntegrationError;

/// CredentialBundle はプロバイダごとの認証情報。プロバイダタグで判別される閉じた和型。
///
/// 平文のまま永続化・ログ出力してはならない。保存時は CredentialVault で暗号化する。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CredentialBundle {
    Linkedin(LinkedInCredentials),
    Salesforce(SalesforceCredentials),
    Hubspot(HubSpotCredentials),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkedInCredentials {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxySettings>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SalesforceCredentials {
    pub username: String,
    pub security_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSpotCredentials {
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

fn require(field: &str, value: &str, provider: Provider) -> Result<(), IntegrationError> {
    if value.trim().is_empty() {
        return Err(IntegrationError::validation(format!(
            "{field} is required for {provider} credentials"
        )));
    }
    Ok(())
}

impl CredentialBundle {
    pub fn provider(&self) -> Provider {
        match self {
            Self::Linkedin(_) => Provider::Linkedin,
            Self::Salesforce(_) => Provider::Salesforce,
            Self::Hubspot(_) => Provider::Hubspot,
        }
    }

    /// validate はプロバイダごとの必須項目が揃っているかを検証する。空文字列は未指定として扱う。
    pub fn validate(&self) -> Result<(), IntegrationError> {
        let provider = self.provider();
        match self {
            Self::Linkedin(c) => {
                require("username", &c.username, provider)?;
                require("password", &c.password, provider)?;
                if let Some(proxy) = &c.proxy {
                    require("proxy.host", &proxy.host, provider)?;
                    if proxy.port == 0 {
                        return Err(IntegrationError::validation("proxy.port must be non-zero"));
                    }
                }
                Ok(())
            }
            Self::Salesforce(c) => {
                require("username", &c.username, provider)?;
                require("security_token", &c.security_token, provider)
            }
            Self::Hubspot(c) => require("api_key", &c.api_key, provider),
        }
    }

    /// hint は画面表示用の非機密な識別子（ユーザー名やポータル ID）を返す。
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Linkedin(c) => Some(c.username.clone()),
            Self::Salesforce(c) => Some(c.username.clone()),
            Self::Hubspot(c) => c.portal_id.clone(),
        }
    }
}

// 認証情報の値を出力しないよう Debug は手動実装する。
impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("provider", &self.provider())
            .field("hint", &self.hint())
            .field("secrets", &"[REDACTED]")
            .finish()
    }
}

impl std::fmt::Debug for LinkedInCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedInCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SalesforceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SalesforceCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for HubSpotCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubSpotCredentials")
            .field("portal_id", &self.portal_id)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linkedin() -> CredentialBundle {
        CredentialBundle::Linkedin(LinkedInCredentials {
            username: "scout@example.com".into(),
            password: "hunter2".into(),
            cookies: None,
            session_token: Some("li_at=abc".into()),
            csrf_token: None,
            user_agent: None,
            proxy: None,
        })
    }

    #[test]
    fn test_deserialize_tagged_bundle() {
        let json = serde_json::json!({
            "provider": "SALESFORCE",
            "username": "ops@example.com",
            "security_token": "tok"
        });
        let bundle: CredentialBundle = serde_json::from_value(json).unwrap();
        assert_eq!(bundle.provider(), Provider::Salesforce);
        assert!(bundle.validate().is_ok());
    }

    #[test]
    fn test_unknown_credential_key_rejected() {
        let json = serde_json::json!({
            "provider": "HUBSPOT",
            "api_key": "k",
            "apiKey": "k"
        });
        assert!(serde_json::from_value::<CredentialBundle>(json).is_err());
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let bundle = CredentialBundle::Salesforce(SalesforceCredentials {
            username: "ops@example.com".into(),
            security_token: "  ".into(),
            client_id: None,
            client_secret: None,
            instance_url: None,
            access_token: None,
            refresh_token: None,
        });
        let err = bundle.validate().unwrap_err();
        assert!(matches!(err, IntegrationError::Validation(ref m) if m.contains("security_token")));
    }

    #[test]
    fn test_proxy_requires_port() {
        let mut bundle = linkedin();
        if let CredentialBundle::Linkedin(ref mut c) = bundle {
            c.proxy = Some(ProxySettings {
                host: "proxy.local".into(),
                port: 0,
                username: None,
                password: None,
            });
        }
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_debug_never_prints_secrets() {
        let rendered = format!("{:?}", linkedin());
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("li_at"));
        assert!(rendered.contains("REDACTED"));
    }
}
