use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entity::profile::Profile;
use crate::domain::repository::ProfileRepository;

/// ProfilePostgresRepository はPostgreSQL実装のプロフィールリポジトリ。
pub struct ProfilePostgresRepository {
    pool: PgPool,
}

impl ProfilePostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, mapping_id, external_id, name, job_title, company, location, profile_url,
           image_url, first_seen_at, last_seen_at, departed_at
    FROM integration.profiles
"#;

#[async_trait]
impl ProfileRepository for ProfilePostgresRepository {
    async fn list_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "{SELECT_COLUMNS} WHERE mapping_id = $1 ORDER BY external_id"
        ))
        .bind(mapping_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn page_by_mapping(
        &self,
        mapping_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<(Vec<Profile>, i64)> {
        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM integration.profiles WHERE mapping_id = $1")
                .bind(mapping_id)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_as::<_, ProfileRow>(&format!(
            "{SELECT_COLUMNS} WHERE mapping_id = $1 ORDER BY external_id LIMIT $2 OFFSET $3"
        ))
        .bind(mapping_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((rows.into_iter().map(Into::into).collect(), total.0))
    }

    async fn find_by_ids(&self, ids: &[Uuid]) -> anyhow::Result<Vec<Profile>> {
        let rows = sqlx::query_as::<_, ProfileRow>(&format!("{SELECT_COLUMNS} WHERE id = ANY($1)"))
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_many(&self, profiles: &[Profile]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        for profile in profiles {
            sqlx::query(
                r#"
                INSERT INTO integration.profiles
                    (id, mapping_id, external_id, name, job_title, company, location, profile_url,
                     image_url, first_seen_at, last_seen_at, departed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (mapping_id, external_id) DO UPDATE
                SET name = EXCLUDED.name, job_title = EXCLUDED.job_title,
                    company = EXCLUDED.company, location = EXCLUDED.location,
                    profile_url = EXCLUDED.profile_url, image_url = EXCLUDED.image_url,
                    last_seen_at = EXCLUDED.last_seen_at, departed_at = EXCLUDED.departed_at
                "#,
            )
            .bind(profile.id)
            .bind(profile.mapping_id)
            .bind(&profile.external_id)
            .bind(&profile.name)
            .bind(&profile.job_title)
            .bind(&profile.company)
            .bind(&profile.location)
            .bind(&profile.profile_url)
            .bind(&profile.image_url)
            .bind(profile.first_seen_at)
            .bind(profile.last_seen_at)
            .bind(profile.departed_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn count_active(&self, mapping_id: Uuid) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM integration.profiles WHERE mapping_id = $1 AND departed_at IS NULL",
        )
        .bind(mapping_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0)
    }

    async fn delete_by_mapping(&self, mapping_id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM integration.profiles WHERE mapping_id = $1")
            .bind(mapping_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// ProfileRow はDB行からのマッピング用。
#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    mapping_id: Uuid,
    external_id: String,
    name: String,
    job_title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    profile_url: Option<String>,
    image_url: Option<String>,
    first_seen_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
    departed_at: Option<DateTime<Utc>>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            mapping_id: row.mapping_id,
            external_id: row.external_id,
            name: row.name,
            job_title: row.job_title,
            company: row.company,
            location: row.location,
            profile_url: row.profile_url,
            image_url: row.image_url,
            first_seen_at: row.first_seen_at,
            last_seen_at: row.last_seen_at,
            departed_at: row.departed_at,
        }
    }
}
