//! PostgreSQL JobStore.
//!
//! Mutual exclusion between dispatcher instances comes only from row locks:
//! `claim_next_tx` and `reclaim_stale_tx` lock candidate rows with
//! `FOR UPDATE SKIP LOCKED`, so concurrent claimers step over each other's rows
//! instead of waiting. All timestamps come from the database's `NOW()`.
//!
//! The `*_tx` free functions take an explicit transaction, so a producer can
//! enqueue as part of its own unit of work:
//!
//! ```ignore
//! let mut tx = pool.begin().await?;
//! sqlx::query("INSERT INTO orders ...").execute(&mut *tx).await?;
//! postgres::enqueue_tx(&mut tx, id, &JobType::new("send_receipt"), &payload, &options).await?;
//! tx.commit().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use crate::domain::{
    EnqueueOptions, Job, JobId, JobStatus, JobType, Lease, MAX_SCHEDULE_DELAY, QueueCounts,
    WorkerId,
};
use crate::error::StoreError;
use crate::ports::{IdGenerator, JobStore, SystemClock, UlidGenerator};

const SCHEMA: &str = include_str!("../../migrations/0001_create_tether_jobs.sql");

const JOB_COLUMNS: &str = "id, job_type, payload, status, attempt_count, max_attempts, \
     scheduled_at, started_at, completed_at, error_message, locked_by, created_at";

pub struct PgJobStore {
    pool: PgPool,
    ids: UlidGenerator<SystemClock>,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ids: UlidGenerator::new(SystemClock),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create `tether_jobs` and its indexes if missing.
    #[instrument(skip(self), err)]
    pub async fn install_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("install_schema", e))?;
        Ok(())
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, payload, options), fields(job_type = %job_type), err)]
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, StoreError> {
        let id = self.ids.generate_job_id();
        let mut tx = self.begin("enqueue").await?;
        enqueue_tx(&mut tx, id, &job_type, &payload, &options).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("enqueue", e))?;
        Ok(id)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM tether_jobs WHERE id = $1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    #[instrument(skip(self), fields(worker_id = %worker_id), err)]
    async fn claim_next(&self, worker_id: &WorkerId) -> Result<Option<Job>, StoreError> {
        let mut tx = self.begin("claim_next").await?;
        let job = claim_next_tx(&mut tx, worker_id).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("claim_next", e))?;
        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %lease.job_id), err)]
    async fn complete(&self, lease: &Lease) -> Result<bool, StoreError> {
        let mut tx = self.begin("complete").await?;
        let applied = complete_tx(&mut tx, lease).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("complete", e))?;
        Ok(applied)
    }

    #[instrument(skip(self, error), fields(job_id = %lease.job_id), err)]
    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        delay: Duration,
        attempt_count: u32,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin("retry").await?;
        let applied = retry_tx(&mut tx, lease, error, delay, attempt_count).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("retry", e))?;
        Ok(applied)
    }

    #[instrument(skip(self, error), fields(job_id = %lease.job_id), err)]
    async fn fail(
        &self,
        lease: &Lease,
        error: &str,
        attempt_count: u32,
    ) -> Result<bool, StoreError> {
        let mut tx = self.begin("fail").await?;
        let applied = fail_tx(&mut tx, lease, error, attempt_count).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("fail", e))?;
        Ok(applied)
    }

    #[instrument(skip(self), err)]
    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<Vec<JobId>, StoreError> {
        let mut tx = self.begin("reclaim_stale").await?;
        let ids = reclaim_stale_tx(&mut tx, lease_timeout).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("reclaim_stale", e))?;
        Ok(ids)
    }

    #[instrument(skip(self), err)]
    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tether_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("counts", e))?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(|e| map_sqlx_error("counts", e))?;
            let n: i64 = row.try_get("n").map_err(|e| map_sqlx_error("counts", e))?;
            let status = status.parse::<JobStatus>().map_err(|e| StoreError::CorruptRow {
                id: "<counts>".to_string(),
                reason: e.to_string(),
            })?;
            counts.record(status, n.max(0) as u64);
        }
        Ok(counts)
    }
}

/// Insert a pending job inside the caller's transaction.
pub async fn enqueue_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: JobId,
    job_type: &JobType,
    payload: &serde_json::Value,
    options: &EnqueueOptions,
) -> Result<(), StoreError> {
    sqlx::query(
        r"
        INSERT INTO tether_jobs (id, job_type, payload, status, attempt_count, max_attempts, scheduled_at)
        VALUES ($1, $2, $3, 'pending', 0, $4, NOW() + $5::bigint * INTERVAL '1 millisecond')
        ",
    )
    .bind(id.to_string())
    .bind(job_type.as_str())
    .bind(payload)
    .bind(to_i32(options.effective_max_attempts()))
    .bind(to_millis(options.initial_delay))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("enqueue", e))?;
    Ok(())
}

/// Lock the earliest eligible row (skipping rows other transactions hold) and
/// mark it processing for `worker_id`.
pub async fn claim_next_tx(
    tx: &mut Transaction<'_, Postgres>,
    worker_id: &WorkerId,
) -> Result<Option<Job>, StoreError> {
    let row = sqlx::query(&format!(
        r"
        WITH next AS (
            SELECT id
            FROM tether_jobs
            WHERE status = 'pending'
              AND scheduled_at <= NOW()
            ORDER BY scheduled_at, id
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        UPDATE tether_jobs AS j
        SET status = 'processing',
            started_at = NOW(),
            completed_at = NULL,
            locked_by = $1
        FROM next
        WHERE j.id = next.id
        RETURNING {}
        ",
        qualified_columns("j")
    ))
    .bind(worker_id.to_string())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("claim_next", e))?;

    let job = row.as_ref().map(job_from_row).transpose()?;
    if let Some(job) = &job {
        debug!(job_id = %job.id, job_type = %job.job_type, "claimed");
    }
    Ok(job)
}

pub async fn complete_tx(
    tx: &mut Transaction<'_, Postgres>,
    lease: &Lease,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE tether_jobs
        SET status = 'completed',
            completed_at = NOW(),
            error_message = NULL,
            locked_by = NULL
        WHERE id = $1 AND status = 'processing' AND locked_by = $2 AND started_at = $3
        ",
    )
    .bind(lease.job_id.to_string())
    .bind(lease.worker_id.to_string())
    .bind(lease.started_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("complete", e))?;
    Ok(result.rows_affected() == 1)
}

pub async fn retry_tx(
    tx: &mut Transaction<'_, Postgres>,
    lease: &Lease,
    error: &str,
    delay: Duration,
    attempt_count: u32,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE tether_jobs
        SET status = 'pending',
            attempt_count = LEAST($4, max_attempts),
            error_message = $5,
            scheduled_at = NOW() + $6::bigint * INTERVAL '1 millisecond',
            locked_by = NULL
        WHERE id = $1 AND status = 'processing' AND locked_by = $2 AND started_at = $3
        ",
    )
    .bind(lease.job_id.to_string())
    .bind(lease.worker_id.to_string())
    .bind(lease.started_at)
    .bind(to_i32(attempt_count))
    .bind(error)
    .bind(to_millis(delay))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("retry", e))?;
    Ok(result.rows_affected() == 1)
}

pub async fn fail_tx(
    tx: &mut Transaction<'_, Postgres>,
    lease: &Lease,
    error: &str,
    attempt_count: u32,
) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r"
        UPDATE tether_jobs
        SET status = 'failed',
            attempt_count = LEAST($4, max_attempts),
            error_message = $5,
            completed_at = NOW(),
            locked_by = NULL
        WHERE id = $1 AND status = 'processing' AND locked_by = $2 AND started_at = $3
        ",
    )
    .bind(lease.job_id.to_string())
    .bind(lease.worker_id.to_string())
    .bind(lease.started_at)
    .bind(to_i32(attempt_count))
    .bind(error)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("fail", e))?;
    Ok(result.rows_affected() == 1)
}

/// Reset processing rows older than `lease_timeout` to pending. Rows locked by
/// a concurrent reaper or resolver are skipped and picked up next time.
pub async fn reclaim_stale_tx(
    tx: &mut Transaction<'_, Postgres>,
    lease_timeout: Duration,
) -> Result<Vec<JobId>, StoreError> {
    let rows = sqlx::query(
        r"
        WITH stale AS (
            SELECT id
            FROM tether_jobs
            WHERE status = 'processing'
              AND started_at < NOW() - $1::bigint * INTERVAL '1 millisecond'
            ORDER BY started_at
            FOR UPDATE SKIP LOCKED
        )
        UPDATE tether_jobs AS j
        SET status = 'pending',
            scheduled_at = NOW(),
            locked_by = NULL
        FROM stale
        WHERE j.id = stale.id
        RETURNING j.id
        ",
    )
    .bind(to_millis(lease_timeout))
    .fetch_all(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("reclaim_stale", e))?;

    let mut ids = rows
        .iter()
        .map(|row| {
            let raw: String = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("reclaim_stale", e))?;
            parse_id(&raw)
        })
        .collect::<Result<Vec<JobId>, StoreError>>()?;
    ids.sort();
    Ok(ids)
}

fn qualified_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let raw_id: String = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;
    let corrupt = |reason: String| StoreError::CorruptRow {
        id: raw_id.clone(),
        reason,
    };
    let get_err = |e: sqlx::Error| corrupt(e.to_string());

    let status: String = row.try_get("status").map_err(get_err)?;
    let attempt_count: i32 = row.try_get("attempt_count").map_err(get_err)?;
    let max_attempts: i32 = row.try_get("max_attempts").map_err(get_err)?;
    let locked_by: Option<String> = row.try_get("locked_by").map_err(get_err)?;
    let job_type: String = row.try_get("job_type").map_err(get_err)?;

    Ok(Job {
        id: parse_id(&raw_id)?,
        job_type: JobType::new(job_type),
        payload: row.try_get("payload").map_err(get_err)?,
        status: status.parse().map_err(|e: crate::domain::UnknownStatus| corrupt(e.to_string()))?,
        attempt_count: u32::try_from(attempt_count)
            .map_err(|_| corrupt(format!("negative attempt_count {attempt_count}")))?,
        max_attempts: u32::try_from(max_attempts)
            .map_err(|_| corrupt(format!("negative max_attempts {max_attempts}")))?,
        scheduled_at: row.try_get("scheduled_at").map_err(get_err)?,
        started_at: row.try_get::<Option<DateTime<Utc>>, _>("started_at").map_err(get_err)?,
        completed_at: row.try_get::<Option<DateTime<Utc>>, _>("completed_at").map_err(get_err)?,
        error_message: row.try_get("error_message").map_err(get_err)?,
        locked_by: locked_by
            .map(|w| w.parse::<WorkerId>())
            .transpose()
            .map_err(|e| corrupt(e.to_string()))?,
        created_at: row.try_get("created_at").map_err(get_err)?,
    })
}

fn parse_id(raw: &str) -> Result<JobId, StoreError> {
    raw.parse::<JobId>().map_err(|e| StoreError::CorruptRow {
        id: raw.to_string(),
        reason: e.to_string(),
    })
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

/// Clamped to `MAX_SCHEDULE_DELAY` so `NOW() +/- interval` stays in range.
fn to_millis(d: Duration) -> i64 {
    i64::try_from(d.min(MAX_SCHEDULE_DELAY).as_millis()).unwrap_or(i64::MAX)
}

/// Connectivity problems become `Unavailable`; the dispatcher backs off on them.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("{operation}: connection pool exhausted or closed"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("{operation}: {e}")),
        sqlx::Error::Tls(e) => StoreError::Unavailable(format!("{operation}: {e}")),
        other => StoreError::Database(other),
    }
}
