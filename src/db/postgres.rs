use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::db::{JobStore, StoreError};
use crate::models::job::{Asset, AssetKind, Job, JobStatus};

/// Postgres-backed job store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, status, created_at, input_key, output_key, height_cm, error";

fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::parse(&status_str)
        .ok_or_else(|| StoreError::Data(format!("unknown job status: {status_str}")))?;
    Ok(Job {
        id: row.try_get("id")?,
        status,
        created_at: row.try_get("created_at")?,
        input_key: row.try_get("input_key")?,
        output_key: row.try_get("output_key")?,
        height_cm: row.try_get("height_cm")?,
        error: row.try_get("error")?,
    })
}

#[async_trait]
impl JobStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn create_job(&self, job: &Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, created_at, input_key, output_key, height_cm, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(&job.input_key)
        .bind(&job.output_key)
        .bind(job.height_cm)
        .bind(&job.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_job_with_input(&self, job: &Job, asset: &Asset) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO assets (object_key, kind, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (object_key) DO NOTHING
            "#,
        )
        .bind(&asset.object_key)
        .bind(asset.kind.as_str())
        .bind(asset.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO jobs (id, status, created_at, input_key, output_key, height_cm, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&job.id)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(&job.input_key)
        .bind(&job.output_key)
        .bind(job.height_cm)
        .bind(&job.error)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_job_inputs(
        &self,
        id: &str,
        input_key: Option<&str>,
        height_cm: Option<f64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET input_key = COALESCE($2, input_key),
                height_cm = COALESCE($3, height_cm)
            WHERE id = $1 AND status IN ('queued', 'failed')
            "#,
        )
        .bind(id)
        .bind(input_key)
        .bind(height_cm)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_processing(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE jobs SET status = 'processing' WHERE id = $1 AND status = 'queued'")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        id: &str,
        fallback_output_key: &str,
        require_active: bool,
    ) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'completed',
                output_key = COALESCE(output_key, $2),
                error = NULL
            WHERE id = $1
              AND CASE WHEN $3 THEN status IN ('queued', 'processing')
                       ELSE status <> 'completed' END
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(fallback_output_key)
        .bind(require_active)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn fail_job(&self, id: &str, error: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = 'failed', error = $2
            WHERE id = $1 AND status <> 'completed'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn requeue_if_failed(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', error = NULL WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn register_asset(&self, asset: &Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assets (object_key, kind, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (object_key) DO NOTHING
            "#,
        )
        .bind(&asset.object_key)
        .bind(asset.kind.as_str())
        .bind(asset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_asset(&self, object_key: &str) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query("SELECT object_key, kind, created_at FROM assets WHERE object_key = $1")
            .bind(object_key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let kind_str: String = r.try_get("kind")?;
                let kind = AssetKind::parse(&kind_str)
                    .ok_or_else(|| StoreError::Data(format!("unknown asset kind: {kind_str}")))?;
                Ok(Some(Asset {
                    object_key: r.try_get("object_key")?,
                    kind,
                    created_at: r.try_get("created_at")?,
                }))
            }
            None => Ok(None),
        }
    }
}
