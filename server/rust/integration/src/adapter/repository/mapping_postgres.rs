use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::mapping::{Mapping, MappingStatus, SearchCriteria};
use crate::domain::repository::MappingRepository;

/// MappingPostgresRepository はPostgreSQL実装のマッピングリポジトリ。
pub struct MappingPostgresRepository {
    pool: PgPool,
}

impl MappingPostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, user_id, name, job_title, company, country, status, last_run_at, next_run_at,
           profiles_count, runs_count, created_at, updated_at
    FROM integration.mappings
"#;

#[async_trait]
impl MappingRepository for MappingPostgresRepository {
    async fn create(&self, mapping: &Mapping) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO integration.mappings
                (id, user_id, name, job_title, company, country, status, last_run_at, next_run_at,
                 profiles_count, runs_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(mapping.id)
        .bind(&mapping.user_id)
        .bind(&mapping.name)
        .bind(&mapping.criteria.job_title)
        .bind(&mapping.criteria.company)
        .bind(&mapping.criteria.country)
        .bind(mapping.status.to_string())
        .bind(mapping.last_run_at)
        .bind(mapping.next_run_at)
        .bind(mapping.profiles_count)
        .bind(mapping.runs_count)
        .bind(mapping.created_at)
        .bind(mapping.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, mapping: &Mapping) -> anyhow::Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE integration.mappings
            SET name = $2, job_title = $3, company = $4, country = $5, status = $6,
                last_run_at = $7, next_run_at = $8, profiles_count = $9, runs_count = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(mapping.id)
        .bind(&mapping.name)
        .bind(&mapping.criteria.job_title)
        .bind(&mapping.criteria.company)
        .bind(&mapping.criteria.country)
        .bind(mapping.status.to_string())
        .bind(mapping.last_run_at)
        .bind(mapping.next_run_at)
        .bind(mapping.profiles_count)
        .bind(mapping.runs_count)
        .bind(mapping.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("mapping not found: {}", mapping.id);
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM integration.mappings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Mapping>> {
        let row = sqlx::query_as::<_, MappingRow>(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_user(&self, user_id: &str) -> anyhow::Result<Vec<Mapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "{SELECT_COLUMNS} WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<Mapping>> {
        let rows = sqlx::query_as::<_, MappingRow>(&format!(
            "{SELECT_COLUMNS} WHERE next_run_at IS NOT NULL AND next_run_at <= $1 \
             AND status NOT IN ('PAUSED', 'IN_PROGRESS') ORDER BY next_run_at"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// MappingRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct MappingRow {
    id: Uuid,
    user_id: String,
    name: String,
    job_title: Option<String>,
    company: Option<String>,
    country: Option<String>,
    status: String,
    last_run_at: Option<DateTime<Utc>>,
    next_run_at: Option<DateTime<Utc>>,
    profiles_count: i64,
    runs_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MappingRow> for Mapping {
    type Error = anyhow::Error;

    fn try_from(row: MappingRow) -> anyhow::Result<Self> {
        Ok(Mapping {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            criteria: SearchCriteria {
                job_title: row.job_title,
                company: row.company,
                country: row.country,
            },
            status: MappingStatus::from_str_value(&row.status)?,
            last_run_at: row.last_run_at,
            next_run_at: row.next_run_at,
            profiles_count: row.profiles_count,
            runs_count: row.runs_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
