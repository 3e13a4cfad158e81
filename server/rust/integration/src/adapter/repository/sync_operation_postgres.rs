use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::sync_operation::{SyncDirection, SyncOperation, SyncStats};
use crate::domain::repository::SyncOperationRepository;

/// SyncOperationPostgresRepository はPostgreSQL実装の同期履歴リポジトリ（追記のみ）。
pub struct SyncOperationPostgresRepository {
    pool: PgPool,
}

impl SyncOperationPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncOperationRepository for SyncOperationPostgresRepository {
    async fn create(&self, operation: &SyncOperation) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration.sync_operations
                (id, account_id, user_id, direction, success, message, processed, successful,
                 failed, skipped, errors, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(operation.id)
        .bind(operation.account_id)
        .bind(&operation.user_id)
        .bind(operation.direction.to_string())
        .bind(operation.success)
        .bind(&operation.message)
        .bind(i32::try_from(operation.stats.processed)?)
        .bind(i32::try_from(operation.stats.successful)?)
        .bind(i32::try_from(operation.stats.failed)?)
        .bind(i32::try_from(operation.stats.skipped)?)
        .bind(serde_json::to_value(&operation.errors)?)
        .bind(operation.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<SyncOperation>> {
        let rows = sqlx::query_as::<_, SyncOperationRow>(
            r#"
            SELECT id, account_id, user_id, direction, success, message, processed, successful,
                   failed, skipped, errors, created_at
            FROM integration.sync_operations
            WHERE account_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// SyncOperationRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct SyncOperationRow {
    id: Uuid,
    account_id: Uuid,
    user_id: String,
    direction: String,
    success: bool,
    message: String,
    processed: i32,
    successful: i32,
    failed: i32,
    skipped: i32,
    errors: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncOperationRow> for SyncOperation {
    type Error = anyhow::Error;

    fn try_from(row: SyncOperationRow) -> anyhow::Result<Self> {
        Ok(SyncOperation {
            id: row.id,
            account_id: row.account_id,
            user_id: row.user_id,
            direction: SyncDirection::from_str_value(&row.direction)?,
            success: row.success,
            message: row.message,
            stats: SyncStats {
                processed: u32::try_from(row.processed)?,
                successful: u32::try_from(row.successful)?,
                failed: u32::try_from(row.failed)?,
                skipped: u32::try_from(row.skipped)?,
            },
            errors: serde_json::from_value(row.errors)?,
            created_at: row.created_at,
        })
    }
}
