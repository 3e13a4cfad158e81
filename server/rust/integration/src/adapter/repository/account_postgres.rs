use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::account::{Account, AccountStatus, EncryptedCredentials, Provider};
use crate::domain::repository::AccountRepository;

/// AccountPostgresRepository はPostgreSQL実装のアカウントリポジトリ。
/// 認証情報は暗号文と nonce のまま保存し、設定と統計は JSONB で保持する。
pub struct AccountPostgresRepository {
    pool: PgPool,
}

impl AccountPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, provider, name, credentials_ciphertext, credentials_nonce, credential_hint,
           is_active, status, last_used_at, error_message, consecutive_failures, config, stats,
           created_at, updated_at
    FROM integration.accounts
"#;

#[async_trait]
impl AccountRepository for AccountPostgresRepository {
    async fn create(&self, account: &Account) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration.accounts
                (id, user_id, provider, name, credentials_ciphertext, credentials_nonce, credential_hint,
                 is_active, status, last_used_at, error_message, consecutive_failures, config, stats,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(account.id)
        .bind(&account.user_id)
        .bind(account.provider.as_str())
        .bind(&account.name)
        .bind(&account.credentials.ciphertext)
        .bind(&account.credentials.nonce)
        .bind(&account.credential_hint)
        .bind(account.is_active)
        .bind(account.status.to_string())
        .bind(account.last_used_at)
        .bind(&account.error_message)
        .bind(i32::try_from(account.consecutive_failures)?)
        .bind(serde_json::to_value(&account.config)?)
        .bind(serde_json::to_value(&account.stats)?)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, account: &Account) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE integration.accounts
            SET name = $2, credentials_ciphertext = $3, credentials_nonce = $4, credential_hint = $5,
                is_active = $6, status = $7, last_used_at = $8, error_message = $9,
                consecutive_failures = $10, config = $11, stats = $12, updated_at = $13
            WHERE id = $1
            "#,
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(&account.credentials.ciphertext)
        .bind(&account.credentials.nonce)
        .bind(&account.credential_hint)
        .bind(account.is_active)
        .bind(account.status.to_string())
        .bind(account.last_used_at)
        .bind(&account.error_message)
        .bind(i32::try_from(account.consecutive_failures)?)
        .bind(serde_json::to_value(&account.config)?)
        .bind(serde_json::to_value(&account.stats)?)
        .bind(account.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("account not found: {}", account.id);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM integration.accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// AccountRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    user_id: String,
    provider: String,
    name: String,
    credentials_ciphertext: String,
    credentials_nonce: String,
    credential_hint: Option<String>,
    is_active: bool,
    status: String,
    last_used_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    consecutive_failures: i32,
    config: serde_json::Value,
    stats: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = anyhow::Error;

    fn try_from(row: AccountRow) -> anyhow::Result<Self> {
        Ok(Account {
            id: row.id,
            user_id: row.user_id,
            provider: Provider::from_str_value(&row.provider)?,
            name: row.name,
            credentials: EncryptedCredentials {
                ciphertext: row.credentials_ciphertext,
                nonce: row.credentials_nonce,
            },
            credential_hint: row.credential_hint,
            is_active: row.is_active,
            status: AccountStatus::from_str_value(&row.status)?,
            last_used_at: row.last_used_at,
            error_message: row.error_message,
            consecutive_failures: u32::try_from(row.consecutive_failures)?,
            config: serde_json::from_value(row.config)?,
            stats: serde_json::from_value(row.stats)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
