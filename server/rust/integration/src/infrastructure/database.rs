use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};

/// DatabaseConfig はデータベース接続設定。
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    /// Debug 出力では [REDACTED] と表示される。
    #[serde(default = "default_password")]
    pub password: SecretString,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,
}

fn default_db_port() -> u16 {
    5432
}

fn default_password() -> SecretString {
    SecretString::new(String::new())
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_open_conns() -> u32 {
    25
}

impl DatabaseConfig {
    /// connect_options は接続オプションを組み立てる。パスワードは URL に埋め込まない。
    pub fn connect_options(&self) -> anyhow::Result<PgConnectOptions> {
        let ssl_mode = PgSslMode::from_str(&self.ssl_mode)
            .map_err(|e| anyhow::anyhow!("invalid database.ssl_mode {:?}: {}", self.ssl_mode, e))?;
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(&self.name)
            .username(&self.user)
            .password(self.password.expose_secret())
            .ssl_mode(ssl_mode))
    }
}

/// options_from_url は DATABASE_URL 形式の接続文字列を解釈する。
pub fn options_from_url(url: &str) -> anyhow::Result<PgConnectOptions> {
    PgConnectOptions::from_str(url).map_err(|e| anyhow::anyhow!("invalid DATABASE_URL: {}", e))
}

/// connect は接続プールを作成し、マイグレーションを適用する。
pub async fn connect(
    options: PgConnectOptions,
    max_connections: u32,
) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await?;
    sqlx::migrate!("../../../database/integration-db/migrations")
        .run(&pool)
        .await?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_from_yaml() {
        let yaml = r#"
host: "localhost"
name: "workloom"
user: "app"
password: "p@ss:word"
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        let options = config.connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_database(), Some("workloom"));
        assert_eq!(config.max_open_conns, 25);
        assert!(!format!("{config:?}").contains("p@ss"));
    }

    #[test]
    fn test_invalid_ssl_mode_is_rejected() {
        let yaml = r#"
host: "localhost"
name: "workloom"
user: "app"
ssl_mode: "sometimes"
"#;
        let config: DatabaseConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.connect_options().is_err());
    }

    #[test]
    fn test_options_from_url() {
        let options = options_from_url("postgres://app:pw@db.internal:6543/integration").unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6543);
        assert!(options_from_url("not a url").is_err());
    }
}
