//! In-memory JobStore (tests, demo).
//!
//! Same contract as the PostgreSQL store, within one process:
//! the select-and-mark of `claim_next` happens under a single mutex guard, and
//! every resolution checks the lease before touching the row. Time comes from
//! the injected `Clock`, so tests drive backoff and lease expiry with a
//! `FixedClock`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::job::{after, before};
use crate::domain::{
    EnqueueOptions, Job, JobId, JobStatus, JobType, Lease, QueueCounts, WorkerId,
};
use crate::error::StoreError;
use crate::ports::{Clock, IdGenerator, JobStore, SystemClock, UlidGenerator};

pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
}

impl InMemoryJobStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            ids: Box::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
        }
    }

    /// Apply `f` if `lease` still owns its row.
    async fn resolve(&self, lease: &Lease, f: impl FnOnce(&mut Job)) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&lease.job_id) {
            Some(job) if job.is_held_by(lease) => {
                f(job);
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> Result<JobId, StoreError> {
        let id = self.ids.generate_job_id();
        let job = Job::new(id, job_type, payload, &options, self.clock.now());
        self.jobs.lock().await.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn claim_next(&self, worker_id: &WorkerId) -> Result<Option<Job>, StoreError> {
        let now = self.clock.now();
        let mut jobs = self.jobs.lock().await;

        let next = jobs
            .values()
            .filter(|j| j.is_eligible(now))
            .min_by_key(|j| (j.scheduled_at, j.id))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            let job = jobs.get_mut(&id)?;
            job.mark_processing(*worker_id, now);
            Some(job.clone())
        }))
    }

    async fn complete(&self, lease: &Lease) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self.resolve(lease, |job| job.mark_completed(now)).await)
    }

    async fn retry(
        &self,
        lease: &Lease,
        error: &str,
        delay: Duration,
        attempt_count: u32,
    ) -> Result<bool, StoreError> {
        let scheduled_at = after(self.clock.now(), delay);
        Ok(self
            .resolve(lease, |job| {
                job.schedule_retry(error.to_string(), scheduled_at);
                job.attempt_count = attempt_count.min(job.max_attempts);
            })
            .await)
    }

    async fn fail(
        &self,
        lease: &Lease,
        error: &str,
        attempt_count: u32,
    ) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .resolve(lease, |job| {
                job.mark_failed(error.to_string(), now);
                job.attempt_count = attempt_count.min(job.max_attempts);
            })
            .await)
    }

    async fn reclaim_stale(&self, lease_timeout: Duration) -> Result<Vec<JobId>, StoreError> {
        let now = self.clock.now();
        let cutoff = before(now, lease_timeout);
        let mut jobs = self.jobs.lock().await;

        let mut reclaimed = Vec::new();
        for job in jobs.values_mut() {
            let stale = job.status == JobStatus::Processing
                && job.started_at.is_some_and(|t| t < cutoff);
            if stale {
                job.reclaim(now);
                reclaimed.push(job.id);
            }
        }
        reclaimed.sort();
        Ok(reclaimed)
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            counts.record(job.status, 1);
        }
        Ok(counts)
    }
}
