use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::account::Provider;
use super::field_mapping::FieldMapping;
use crate::domain::error::IntegrationError;

pub const DAILY_LIMIT_RANGE: std::ops::RangeInclusive<u32> = 1..=2000;
pub const REQUEST_DELAY_RANGE_MS: std::ops::RangeInclusive<u64> = 1000..=10_000;

/// ProviderConfig はプロバイダ別の設定。未知のキーは境界で拒否する。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderConfig {
    Linkedin(ScrapingConfig),
    Salesforce(SalesforceConfig),
    Hubspot(HubSpotConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrapingConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,
    #[serde(default)]
    pub enable_rotation: bool,
    /// false の場合は呼び出し間隔の待機を省略する。日次上限は常に適用される。
    #[serde(default = "default_true")]
    pub respect_rate_limits: bool,
}

fn default_daily_limit() -> u32 {
    500
}

fn default_request_delay_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            daily_limit: default_daily_limit(),
            request_delay_ms: default_request_delay_ms(),
            enable_rotation: false,
            respect_rate_limits: true,
        }
    }
}

impl ScrapingConfig {
    pub fn validate(&self) -> Result<(), IntegrationError> {
        if !DAILY_LIMIT_RANGE.contains(&self.daily_limit) {
            return Err(IntegrationError::validation(format!(
                "daily_limit must be between {} and {}",
                DAILY_LIMIT_RANGE.start(),
                DAILY_LIMIT_RANGE.end()
            )));
        }
        if !REQUEST_DELAY_RANGE_MS.contains(&self.request_delay_ms) {
            return Err(IntegrationError::validation(format!(
                "request_delay_ms must be between {} and {}",
                REQUEST_DELAY_RANGE_MS.start(),
                REQUEST_DELAY_RANGE_MS.end()
            )));
        }
        Ok(())
    }
}

/// DuplicateHandling はエクスポート時に既存レコードが見つかった場合の扱い。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateHandling {
    Skip,
    #[default]
    Update,
    CreateNew,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SalesforceObjectMappings {
    #[serde(default = "default_true")]
    pub lead: bool,
    #[serde(default = "default_true")]
    pub contact: bool,
    #[serde(default)]
    pub account: bool,
}

impl Default for SalesforceObjectMappings {
    fn default() -> Self {
        Self {
            lead: true,
            contact: true,
            account: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SalesforceConfig {
    #[serde(default)]
    pub object_mappings: SalesforceObjectMappings,
    #[serde(default = "FieldMapping::salesforce_default")]
    pub field_mapping: FieldMapping,
    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,
}

impl Default for SalesforceConfig {
    fn default() -> Self {
        Self {
            object_mappings: SalesforceObjectMappings::default(),
            field_mapping: FieldMapping::salesforce_default(),
            duplicate_handling: DuplicateHandling::Update,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSpotObjectMappings {
    #[serde(default = "default_true")]
    pub contacts: bool,
    #[serde(default = "default_true")]
    pub companies: bool,
    #[serde(default)]
    pub deals: bool,
}

impl Default for HubSpotObjectMappings {
    fn default() -> Self {
        Self {
            contacts: true,
            companies: true,
            deals: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HubSpotConfig {
    #[serde(default)]
    pub object_mappings: HubSpotObjectMappings,
    #[serde(default = "FieldMapping::hubspot_default")]
    pub field_mapping: FieldMapping,
    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,
    #[serde(default)]
    pub enable_workflows: bool,
}

impl Default for HubSpotConfig {
    fn default() -> Self {
        Self {
            object_mappings: HubSpotObjectMappings::default(),
            field_mapping: FieldMapping::hubspot_default(),
            duplicate_handling: DuplicateHandling::Update,
            enable_workflows: false,
        }
    }
}

/// CrmSettings は CRM 系プロバイダの設定から同期処理が必要とする部分を取り出したビュー。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmSettings {
    pub field_mapping: FieldMapping,
    pub duplicate_handling: DuplicateHandling,
    /// エクスポート先オブジェクト。有効なオブジェクトがなければ None。
    pub export_object: Option<String>,
}

impl ProviderConfig {
    pub fn default_for(provider: Provider) -> Self {
        match provider {
            Provider::Linkedin => Self::Linkedin(ScrapingConfig::default()),
            Provider::Salesforce => Self::Salesforce(SalesforceConfig::default()),
            Provider::Hubspot => Self::Hubspot(HubSpotConfig::default()),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Self::Linkedin(_) => Provider::Linkedin,
            Self::Salesforce(_) => Provider::Salesforce,
            Self::Hubspot(_) => Provider::Hubspot,
        }
    }

    pub fn validate(&self) -> Result<(), IntegrationError> {
        match self {
            Self::Linkedin(c) => c.validate(),
            Self::Salesforce(c) => c.field_mapping.validate(),
            Self::Hubspot(c) => c.field_mapping.validate(),
        }
    }

    pub fn scraping(&self) -> Option<&ScrapingConfig> {
        match self {
            Self::Linkedin(c) => Some(c),
            _ => None,
        }
    }

    pub fn crm_settings(&self) -> Option<CrmSettings> {
        match self {
            Self::Linkedin(_) => None,
            Self::Salesforce(c) => Some(CrmSettings {
                field_mapping: c.field_mapping.clone(),
                duplicate_handling: c.duplicate_handling,
                export_object: if c.object_mappings.lead {
                    Some("Lead".to_string())
                } else if c.object_mappings.contact {
                    Some("Contact".to_string())
                } else {
                    None
                },
            }),
            Self::Hubspot(c) => Some(CrmSettings {
                field_mapping: c.field_mapping.clone(),
                duplicate_handling: c.duplicate_handling,
                export_object: c.object_mappings.contacts.then(|| "contacts".to_string()),
            }),
        }
    }

    /// set_field_mapping は CRM 設定のフィールドマッピングを差し替える。
    pub fn set_field_mapping(&mut self, mapping: FieldMapping) -> Result<(), IntegrationError> {
        mapping.validate()?;
        match self {
            Self::Linkedin(_) => Err(IntegrationError::validation(
                "field mappings are only available for CRM accounts",
            )),
            Self::Salesforce(c) => {
                c.field_mapping = mapping;
                Ok(())
            }
            Self::Hubspot(c) => {
                c.field_mapping = mapping;
                Ok(())
            }
        }
    }
}

/// ProviderStats はプロバイダ別の累積統計。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStats {
    Linkedin(LinkedInStats),
    Salesforce(CrmStats),
    Hubspot(CrmStats),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkedInStats {
    pub profiles_scraped: u64,
    pub profiles_failed: u64,
    pub daily_usage: u32,
    pub last_reset_date: Option<NaiveDate>,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmStats {
    pub records_imported: u64,
    pub records_exported: u64,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_errors: u64,
}

impl LinkedInStats {
    /// record_job はジョブ結果を累積し、当日の利用量と成功率を更新する。
    #[allow(clippy::cast_precision_loss)]
    pub fn record_job(&mut self, scraped: u32, failed: u32, daily_usage: u32, today: NaiveDate) {
        self.profiles_scraped += u64::from(scraped);
        self.profiles_failed += u64::from(failed);
        self.daily_usage = daily_usage;
        self.last_reset_date = Some(today);
        let attempted = self.profiles_scraped + self.profiles_failed;
        self.success_rate = if attempted == 0 {
            0.0
        } else {
            self.profiles_scraped as f64 / attempted as f64
        };
    }
}

impl ProviderStats {
    pub fn empty_for(provider: Provider) -> Self {
        match provider {
            Provider::Linkedin => Self::Linkedin(LinkedInStats::default()),
            Provider::Salesforce => Self::Salesforce(CrmStats::default()),
            Provider::Hubspot => Self::Hubspot(CrmStats::default()),
        }
    }

    pub fn linkedin_mut(&mut self) -> Option<&mut LinkedInStats> {
        match self {
            Self::Linkedin(s) => Some(s),
            _ => None,
        }
    }

    pub fn crm_mut(&mut self) -> Option<&mut CrmStats> {
        match self {
            Self::Linkedin(_) => None,
            Self::Salesforce(s) | Self::Hubspot(s) => Some(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scraping_config_defaults() {
        let cfg: ProviderConfig =
            serde_json::from_value(serde_json::json!({ "provider": "LINKEDIN" })).unwrap();
        let scraping = cfg.scraping().unwrap();
        assert_eq!(scraping.daily_limit, 500);
        assert_eq!(scraping.request_delay_ms, 2000);
        assert!(!scraping.enable_rotation);
        assert!(scraping.respect_rate_limits);
    }

    #[test]
    fn test_scraping_config_bounds() {
        let mut cfg = ScrapingConfig::default();
        cfg.daily_limit = 2001;
        assert!(cfg.validate().is_err());
        cfg.daily_limit = 2000;
        cfg.request_delay_ms = 999;
        assert!(cfg.validate().is_err());
        cfg.request_delay_ms = 10_000;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_unknown_config_key_rejected() {
        let json = serde_json::json!({ "provider": "LINKEDIN", "dailyLimit": 10 });
        assert!(serde_json::from_value::<ProviderConfig>(json).is_err());
    }

    #[test]
    fn test_salesforce_export_object_prefers_lead() {
        let mut cfg = SalesforceConfig::default();
        let settings = ProviderConfig::Salesforce(cfg.clone()).crm_settings().unwrap();
        assert_eq!(settings.export_object.as_deref(), Some("Lead"));

        cfg.object_mappings.lead = false;
        cfg.object_mappings.contact = false;
        let settings = ProviderConfig::Salesforce(cfg).crm_settings().unwrap();
        assert_eq!(settings.export_object, None);
    }

    #[test]
    fn test_linkedin_stats_success_rate() {
        let mut stats = LinkedInStats::default();
        let today = chrono::NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        stats.record_job(8, 2, 10, today);
        assert!((stats.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(stats.last_reset_date, Some(today));
    }
}
