use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::infrastructure::database::DatabaseConfig;

/// Config はアプリケーション全体の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub vault: VaultConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

impl Config {
    /// load は YAML ファイルから設定を読み込む。
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            anyhow::anyhow!("failed to read config {}: {}", path.as_ref().display(), e)
        })?;
        let cfg: Config = serde_yaml::from_str(&content)?;
        cfg.rate_limit.timezone()?;
        Ok(cfg)
    }
}

/// AppConfig はアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// ServerConfig はサーバー設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// ObservabilityConfig はログとトレースの設定。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// VaultConfig は認証情報暗号化キーの取得元。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VaultConfig {
    #[serde(default = "default_master_key_env")]
    pub master_key_env: String,
}

fn default_master_key_env() -> String {
    "WORKLOOM_VAULT_MASTER_KEY".to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key_env: default_master_key_env(),
        }
    }
}

/// SchedulerConfig はスクレイピングジョブのワーカー設定。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_worker_timeout_secs")]
    pub worker_timeout_secs: u64,
    #[serde(default = "default_connector_timeout_ms")]
    pub connector_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    /// 連続失敗がこの回数に達すると ACTIVE → ERROR に遷移する。
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: u32,
}

fn default_max_concurrent_jobs() -> usize {
    8
}

fn default_worker_timeout_secs() -> u64 {
    1800
}

fn default_connector_timeout_ms() -> u64 {
    10_000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_search_page_size() -> u32 {
    25
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            worker_timeout_secs: default_worker_timeout_secs(),
            connector_timeout_ms: default_connector_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            failure_threshold: default_failure_threshold(),
            search_page_size: default_search_page_size(),
        }
    }
}

impl SchedulerConfig {
    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_secs)
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_millis(self.connector_timeout_ms)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }
}

/// RateLimitConfig はクォータの日付境界を決めるタイムゾーン。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl RateLimitConfig {
    pub fn timezone(&self) -> anyhow::Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid rate_limit.timezone {}: {}", self.timezone, e))
    }
}

/// MappingConfig はマッピングの定期実行設定。
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    #[serde(default = "default_run_interval_hours")]
    pub run_interval_hours: i64,
    #[serde(default = "default_dispatch_interval_secs")]
    pub dispatch_interval_secs: u64,
    #[serde(default = "default_max_results_per_run")]
    pub max_results_per_run: u32,
}

fn default_run_interval_hours() -> i64 {
    24
}

fn default_dispatch_interval_secs() -> u64 {
    60
}

fn default_max_results_per_run() -> u32 {
    1000
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            run_interval_hours: default_run_interval_hours(),
            dispatch_interval_secs: default_dispatch_interval_secs(),
            max_results_per_run: default_max_results_per_run(),
        }
    }
}

impl MappingConfig {
    pub fn run_interval(&self) -> chrono::Duration {
        chrono::Duration::hours(self.run_interval_hours.max(1))
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch_interval_secs.max(1))
    }
}

/// ConnectorsConfig はプロバイダごとのゲートウェイ接続先。
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub linkedin: Option<ConnectorEndpoint>,
    #[serde(default)]
    pub salesforce: Option<ConnectorEndpoint>,
    #[serde(default)]
    pub hubspot: Option<ConnectorEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectorEndpoint {
    pub base_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_deserialization() {
        let yaml = r#"
app:
  name: "integration-server"
  version: "0.2.0"
  environment: "staging"
server:
  host: "127.0.0.1"
  port: 9090
scheduler:
  max_concurrent_jobs: 4
  failure_threshold: 5
rate_limit:
  timezone: "America/Los_Angeles"
mapping:
  run_interval_hours: 12
connectors:
  linkedin:
    base_url: "http://gateway:8081"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app.name, "integration-server");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.scheduler.max_concurrent_jobs, 4);
        assert_eq!(config.scheduler.failure_threshold, 5);
        assert_eq!(config.scheduler.search_page_size, 25);
        assert_eq!(
            config.rate_limit.timezone().unwrap(),
            chrono_tz::America::Los_Angeles
        );
        assert_eq!(config.mapping.run_interval(), chrono::Duration::hours(12));
        assert!(config.connectors.linkedin.is_some());
        assert!(config.connectors.hubspot.is_none());
    }

    #[test]
    fn test_config_defaults() {
        let yaml = r#"
app:
  name: "integration-server"
server: {}
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app.version, "0.1.0");
        assert_eq!(config.app.environment, "dev");
        assert_eq!(config.server.port, 8080);
        assert!(config.database.is_none());
        assert_eq!(config.vault.master_key_env, "WORKLOOM_VAULT_MASTER_KEY");
        assert_eq!(config.scheduler.max_concurrent_jobs, 8);
        assert_eq!(config.scheduler.worker_timeout(), Duration::from_secs(1800));
        assert_eq!(config.scheduler.connector_timeout(), Duration::from_secs(10));
        assert_eq!(config.scheduler.retry_max_attempts, 3);
        assert_eq!(config.rate_limit.timezone().unwrap(), chrono_tz::UTC);
        assert_eq!(config.mapping.dispatch_interval(), Duration::from_secs(60));
        assert_eq!(config.mapping.max_results_per_run, 1000);
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_unknown_scheduler_key_rejected() {
        let yaml = r#"
app:
  name: "integration-server"
server: {}
scheduler:
  max_jobs: 3
"#;
        assert!(serde_yaml::from_str::<Config>(yaml).is_err());
    }

    #[test]
    fn test_load_rejects_invalid_timezone() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "app:\n  name: x\nserver: {{}}\nrate_limit:\n  timezone: \"Mars/Olympus\""
        )
        .unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "app:\n  name: from-file\nserver:\n  port: 7000").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.app.name, "from-file");
        assert_eq!(config.server.port, 7000);
    }
}
