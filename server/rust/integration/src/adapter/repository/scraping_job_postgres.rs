use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::scraping_job::{JobStatus, JobType, ScrapingJob};
use crate::domain::repository::ScrapingJobRepository;

/// ScrapingJobPostgresRepository はPostgreSQL実装のスクレイピングジョブリポジトリ。
pub struct ScrapingJobPostgresRepository {
    pool: PgPool,
}

impl ScrapingJobPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, account_id, user_id, job_type, status, config, found, scraped, failed, retryable,
           error_message, created_at, started_at, completed_at
    FROM integration.scraping_jobs
"#;

#[async_trait]
impl ScrapingJobRepository for ScrapingJobPostgresRepository {
    async fn create(&self, job: &ScrapingJob) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration.scraping_jobs
                (id, account_id, user_id, job_type, status, config, found, scraped, failed,
                 retryable, error_message, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(job.id)
        .bind(job.account_id)
        .bind(&job.user_id)
        .bind(job.job_type.to_string())
        .bind(job.status.to_string())
        .bind(serde_json::to_value(&job.config)?)
        .bind(i32::try_from(job.found)?)
        .bind(i32::try_from(job.scraped)?)
        .bind(i32::try_from(job.failed)?)
        .bind(job.retryable)
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, job: &ScrapingJob) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE integration.scraping_jobs
            SET status = $2, found = $3, scraped = $4, failed = $5, retryable = $6,
                error_message = $7, started_at = $8, completed_at = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(i32::try_from(job.found)?)
        .bind(i32::try_from(job.scraped)?)
        .bind(i32::try_from(job.failed)?)
        .bind(job.retryable)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("scraping job not found: {}", job.id);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<ScrapingJob>> {
        let row = sqlx::query_as::<_, ScrapingJobRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_account(&self, account_id: Uuid) -> anyhow::Result<Vec<ScrapingJob>> {
        let rows = sqlx::query_as::<_, ScrapingJobRow>(&format!(
            "{SELECT_COLUMNS} WHERE account_id = $1 ORDER BY created_at DESC"
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_unfinished(&self) -> anyhow::Result<Vec<ScrapingJob>> {
        let rows = sqlx::query_as::<_, ScrapingJobRow>(&format!(
            "{SELECT_COLUMNS} WHERE status IN ('PENDING', 'RUNNING') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// ScrapingJobRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct ScrapingJobRow {
    id: Uuid,
    account_id: Uuid,
    user_id: String,
    job_type: String,
    status: String,
    config: serde_json::Value,
    found: i32,
    scraped: i32,
    failed: i32,
    retryable: bool,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ScrapingJobRow> for ScrapingJob {
    type Error = anyhow::Error;

    fn try_from(row: ScrapingJobRow) -> anyhow::Result<Self> {
        Ok(ScrapingJob {
            id: row.id,
            account_id: row.account_id,
            user_id: row.user_id,
            job_type: JobType::from_str_value(&row.job_type)?,
            status: JobStatus::from_str_value(&row.status)?,
            config: serde_json::from_value(row.config)?,
            found: u32::try_from(row.found)?,
            scraped: u32::try_from(row.scraped)?,
            failed: u32::try_from(row.failed)?,
            retryable: row.retryable,
            error_message: row.error_message,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
