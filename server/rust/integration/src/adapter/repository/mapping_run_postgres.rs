use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::mapping_run::{MappingRun, RunCounts, RunStatus};
use crate::domain::repository::MappingRunRepository;

/// MappingRunPostgresRepository はPostgreSQL実装のマッピングランリポジトリ。
/// 1 マッピングにつき IN_PROGRESS のランは部分一意インデックスで 1 件に制限される。
pub struct MappingRunPostgresRepository {
    pool: PgPool,
}

impl MappingRunPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, mapping_id, run_date, status, job_id, total_found, new_profiles, departures,
           job_changes, error_message, completed_at
    FROM integration.mapping_runs
"#;

#[async_trait]
impl MappingRunRepository for MappingRunPostgresRepository {
    async fn create_if_idle(&self, run: &MappingRun) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO integration.mapping_runs
                (id, mapping_id, run_date, status, job_id, total_found, new_profiles, departures,
                 job_changes, error_message, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (mapping_id) WHERE status = 'IN_PROGRESS' DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(run.mapping_id)
        .bind(run.run_date)
        .bind(run.status.to_string())
        .bind(run.job_id)
        .bind(i32::try_from(run.counts.total_found)?)
        .bind(i32::try_from(run.counts.new_profiles)?)
        .bind(i32::try_from(run.counts.departures)?)
        .bind(i32::try_from(run.counts.job_changes)?)
        .bind(&run.error_message)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update(&self, run: &MappingRun) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE integration.mapping_runs
            SET status = $2, job_id = $3, total_found = $4, new_profiles = $5, departures = $6,
                job_changes = $7, error_message = $8, completed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.to_string())
        .bind(run.job_id)
        .bind(i32::try_from(run.counts.total_found)?)
        .bind(i32::try_from(run.counts.new_profiles)?)
        .bind(i32::try_from(run.counts.departures)?)
        .bind(i32::try_from(run.counts.job_changes)?)
        .bind(&run.error_message)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("mapping run not found: {}", run.id);
        }
        Ok(())
    }

    async fn find_in_progress(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>> {
        let row = sqlx::query_as::<_, MappingRunRow>(&format!(
            "{SELECT_COLUMNS} WHERE mapping_id = $1 AND status = 'IN_PROGRESS'"
        ))
        .bind(mapping_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_in_progress(&self) -> anyhow::Result<Vec<MappingRun>> {
        let rows = sqlx::query_as::<_, MappingRunRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = 'IN_PROGRESS' ORDER BY run_date"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_latest(&self, mapping_id: Uuid) -> anyhow::Result<Option<MappingRun>> {
        let row = sqlx::query_as::<_, MappingRunRow>(&format!(
            "{SELECT_COLUMNS} WHERE mapping_id = $1 ORDER BY run_date DESC, id DESC LIMIT 1"
        ))
        .bind(mapping_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<MappingRun>> {
        let rows = sqlx::query_as::<_, MappingRunRow>(&format!(
            "{SELECT_COLUMNS} WHERE mapping_id = $1 ORDER BY run_date DESC, id DESC"
        ))
        .bind(mapping_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM integration.mapping_runs WHERE mapping_id = $1")
                .bind(mapping_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM integration.mapping_runs WHERE mapping_id = $1")
            .bind(mapping_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// MappingRunRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct MappingRunRow {
    id: Uuid,
    mapping_id: Uuid,
    run_date: DateTime<Utc>,
    status: String,
    job_id: Option<Uuid>,
    total_found: i32,
    new_profiles: i32,
    departures: i32,
    job_changes: i32,
    error_message: Option<String>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<MappingRunRow> for MappingRun {
    type Error = anyhow::Error;

    fn try_from(row: MappingRunRow) -> anyhow::Result<Self> {
        Ok(MappingRun {
            id: row.id,
            mapping_id: row.mapping_id,
            run_date: row.run_date,
            status: RunStatus::from_str_value(&row.status)?,
            job_id: row.job_id,
            counts: RunCounts {
                total_found: u32::try_from(row.total_found)?,
                new_profiles: u32::try_from(row.new_profiles)?,
                departures: u32::try_from(row.departures)?,
                job_changes: u32::try_from(row.job_changes)?,
            },
            error_message: row.error_message,
            completed_at: row.completed_at,
        })
    }
}
