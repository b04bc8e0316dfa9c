//! JobStore port - ジョブ行の正本（source of truth）
//!
//! # 設計原則
//! - 全ての変更は atomic な claim / resolve / reclaim を通す（read-then-write しない）
//! - claim は「select + mark」を同一トランザクション（または同一ロック）内で行う
//! - resolve は lease で guard する。reaper に回収された後の resolve は no-op
//!
//! Implementations: `impls::InMemoryJobStore` (tests, demo) and
//! `impls::PgJobStore` (`FOR UPDATE SKIP LOCKED`).

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{EnqueueOptions, Job, JobId, JobType, Lease, QueueCounts, WorkerId};
use crate::error::StoreError;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a pending job, eligible at `now + options.initial_delay`.
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// Claim the earliest eligible job for `worker_id`.
    ///
    /// Concurrent callers never receive the same job. `None` means nothing is
    /// eligible right now.
    async fn claim_next(&self, worker_id: &WorkerId) -> Result<Option<Job>, StoreError>;

    /// Processing → completed. Returns `false` if the lease was lost.
    async fn complete(&self, lease: &Lease) -> Result<bool, StoreError>;

    /// Processing → pending with `scheduled_at = now + delay`.
    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        delay: Duration,
        attempt_count: u32,
    ) -> Result<bool, StoreError>;

    /// Processing → failed (terminal).
    async fn fail(&self, lease: &Lease, error: &str, attempt_count: u32)
    -> Result<bool, StoreError>;

    /// Reset jobs stuck in processing for longer than `lease_timeout`.
    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<Vec<JobId>, StoreError>;

    async fn counts(&self) -> Result<QueueCounts, StoreError>;
}
