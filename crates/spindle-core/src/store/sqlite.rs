//! SQLite-backed store.
//!
//! Single-statement atomicity: the claim is one `UPDATE ... WHERE id IN
//! (SELECT ... LIMIT 1) RETURNING *`, promotion/recovery are one batch
//! `UPDATE` each, and outcome writes carry the claim fence in their `WHERE`
//! clause. Timestamps are stored as integer unix milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};

use crate::domain::{ClaimToken, JobId, JobRecord, JobStatus, WorkerId};
use crate::error::SpindleError;
use crate::observability::QueueCounts;
use crate::store::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    queue_name TEXT NOT NULL,
    data TEXT NOT NULL,
    status TEXT NOT NULL,
    priority INTEGER NOT NULL DEFAULT 0,
    attempts INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    delay_ms INTEGER,
    scheduled_for INTEGER,
    worker_id TEXT,
    processed_on INTEGER,
    finished_on INTEGER,
    result TEXT,
    failure_reason TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jobs_queue_status
    ON jobs (queue_name, status);
CREATE INDEX IF NOT EXISTS idx_jobs_queue_status_scheduled
    ON jobs (queue_name, status, scheduled_for);
"#;

/// Store implementation over a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database at `url` and ensure the schema exists.
    pub async fn connect(url: &str) -> Result<Self, SpindleError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(db_err)?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call `ensure_schema` before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), SpindleError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

fn db_err(e: sqlx::Error) -> SpindleError {
    SpindleError::Storage(e.to_string())
}

fn dt_from_ms(ms: i64) -> Result<DateTime<Utc>, SpindleError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| SpindleError::Storage(format!("timestamp out of range: {ms}")))
}

fn opt_dt_from_ms(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, SpindleError> {
    ms.map(dt_from_ms).transpose()
}

fn record_from_row(row: &SqliteRow) -> Result<JobRecord, SpindleError> {
    let id: String = row.try_get("id").map_err(db_err)?;
    let id = JobId::parse(&id).map_err(|e| SpindleError::Storage(format!("bad job id: {e}")))?;

    let worker_id: Option<String> = row.try_get("worker_id").map_err(db_err)?;
    let worker_id = worker_id
        .map(|s| {
            WorkerId::parse(&s).map_err(|e| SpindleError::Storage(format!("bad worker id: {e}")))
        })
        .transpose()?;

    let status: String = row.try_get("status").map_err(db_err)?;
    let status = status.parse::<JobStatus>().map_err(SpindleError::Storage)?;

    let data: String = row.try_get("data").map_err(db_err)?;
    let result: Option<String> = row.try_get("result").map_err(db_err)?;

    Ok(JobRecord {
        id,
        queue_name: row.try_get("queue_name").map_err(db_err)?,
        data: serde_json::from_str(&data)?,
        status,
        priority: row.try_get::<i64, _>("priority").map_err(db_err)? as i32,
        attempts: row.try_get::<i64, _>("attempts").map_err(db_err)? as u32,
        max_attempts: row.try_get::<i64, _>("max_attempts").map_err(db_err)? as u32,
        delay_ms: row
            .try_get::<Option<i64>, _>("delay_ms")
            .map_err(db_err)?
            .map(|v| v as u64),
        scheduled_for: opt_dt_from_ms(row.try_get("scheduled_for").map_err(db_err)?)?,
        worker_id,
        processed_on: opt_dt_from_ms(row.try_get("processed_on").map_err(db_err)?)?,
        finished_on: opt_dt_from_ms(row.try_get("finished_on").map_err(db_err)?)?,
        result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        failure_reason: row.try_get("failure_reason").map_err(db_err)?,
        created_at: dt_from_ms(row.try_get("created_at").map_err(db_err)?)?,
        updated_at: dt_from_ms(row.try_get("updated_at").map_err(db_err)?)?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn insert(&self, record: JobRecord) -> Result<(), SpindleError> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, queue_name, data, status, priority, attempts, max_attempts,
                delay_ms, scheduled_for, worker_id, processed_on, finished_on,
                result, failure_reason, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.as_storage_str())
        .bind(&record.queue_name)
        .bind(serde_json::to_string(&record.data)?)
        .bind(record.status.as_str())
        .bind(record.priority as i64)
        .bind(record.attempts as i64)
        .bind(record.max_attempts as i64)
        .bind(record.delay_ms.map(|v| v as i64))
        .bind(record.scheduled_for.map(|t| t.timestamp_millis()))
        .bind(record.worker_id.map(|w| w.as_storage_str()))
        .bind(record.processed_on.map(|t| t.timestamp_millis()))
        .bind(record.finished_on.map(|t| t.timestamp_millis()))
        .bind(
            record
                .result
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(&record.failure_reason)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>, SpindleError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.as_storage_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn claim_next(
        &self,
        queue_name: &str,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<Option<JobRecord>, SpindleError> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'active', worker_id = ?, processed_on = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue_name = ? AND status = 'waiting'
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(worker_id.as_storage_str())
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(queue_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn promote_due(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, SpindleError> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting', scheduled_for = NULL, updated_at = ?
            WHERE queue_name = ? AND status = 'delayed' AND scheduled_for <= ?
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(queue_name)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(done.rows_affected())
    }

    async fn recover_stuck(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<JobId>, SpindleError> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'waiting', worker_id = NULL, processed_on = NULL, updated_at = ?
            WHERE queue_name = ? AND status = 'active' AND processed_on < ?
            RETURNING id
            "#,
        )
        .bind(now.timestamp_millis())
        .bind(queue_name)
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id").map_err(db_err)?;
                JobId::parse(&id).map_err(|e| SpindleError::Storage(format!("bad job id: {e}")))
            })
            .collect()
    }

    async fn complete(
        &self,
        id: JobId,
        token: &ClaimToken,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', result = ?, finished_on = ?, worker_id = NULL,
                updated_at = ?
            WHERE id = ? AND status = 'active' AND worker_id = ? AND processed_on = ?
            "#,
        )
        .bind(serde_json::to_string(&result)?)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id.as_storage_str())
        .bind(token.worker_id.as_storage_str())
        .bind(token.processed_on.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(done.rows_affected() == 1)
    }

    async fn schedule_retry(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        scheduled_for: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let delay_ms = (scheduled_for - now).num_milliseconds().max(0);
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'delayed', attempts = attempts + 1, failure_reason = ?,
                scheduled_for = ?, delay_ms = ?, worker_id = NULL,
                processed_on = NULL, updated_at = ?
            WHERE id = ? AND status = 'active' AND worker_id = ? AND processed_on = ?
            "#,
        )
        .bind(reason)
        .bind(scheduled_for.timestamp_millis())
        .bind(delay_ms)
        .bind(now.timestamp_millis())
        .bind(id.as_storage_str())
        .bind(token.worker_id.as_storage_str())
        .bind(token.processed_on.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(done.rows_affected() == 1)
    }

    async fn fail(
        &self,
        id: JobId,
        token: &ClaimToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, SpindleError> {
        let done = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed', attempts = attempts + 1, failure_reason = ?,
                finished_on = ?, worker_id = NULL, processed_on = NULL, updated_at = ?
            WHERE id = ? AND status = 'active' AND worker_id = ? AND processed_on = ?
            "#,
        )
        .bind(reason)
        .bind(now.timestamp_millis())
        .bind(now.timestamp_millis())
        .bind(id.as_storage_str())
        .bind(token.worker_id.as_storage_str())
        .bind(token.processed_on.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(done.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        queue_name: &str,
        status: JobStatus,
    ) -> Result<Vec<JobRecord>, SpindleError> {
        let order_by = match status {
            JobStatus::Waiting => "priority DESC, created_at ASC, id ASC",
            JobStatus::Active => "processed_on ASC",
            JobStatus::Delayed => "scheduled_for ASC",
            JobStatus::Completed | JobStatus::Failed => "finished_on DESC",
        };
        let query = format!(
            "SELECT * FROM jobs WHERE queue_name = ? AND status = ? ORDER BY {order_by}"
        );

        let rows = sqlx::query(&query)
            .bind(queue_name)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(record_from_row).collect()
    }

    async fn counts(&self, queue_name: &str) -> Result<QueueCounts, SpindleError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM jobs WHERE queue_name = ? GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut counts = QueueCounts::default();
        for row in &rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let status = status.parse::<JobStatus>().map_err(SpindleError::Storage)?;
            let n = row.try_get::<i64, _>("n").map_err(db_err)? as usize;
            match status {
                JobStatus::Waiting => counts.waiting += n,
                JobStatus::Delayed => counts.delayed += n,
                JobStatus::Active => counts.active += n,
                JobStatus::Completed => counts.completed += n,
                JobStatus::Failed => counts.failed += n,
            }
        }

        Ok(counts)
    }

    async fn delete_finished_before(
        &self,
        queue_name: &str,
        status: JobStatus,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, SpindleError> {
        let done = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE queue_name = ? AND status = ?
              AND finished_on IS NOT NULL AND finished_on < ?
            "#,
        )
        .bind(queue_name)
        .bind(status.as_str())
        .bind(cutoff.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(done.rows_affected())
    }
}
