//! Dispatcher - claim → execute → decide → resolve を batch 単位で回す
//!
//! One `dispatch_once` is one tick. Any number of dispatchers (tasks or
//! processes) may tick concurrently against the same store; they never share
//! in-memory state, only the store's row locks.

use std::sync::Arc;

use serde::Serialize;
use tracing::{Instrument, debug, info, info_span, warn};

use super::executor::Executor;
use crate::domain::{Decider, Decision, Job, WorkerId};
use crate::error::StoreError;
use crate::ports::JobStore;

/// Counts for one `dispatch_once` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    /// 1 when the batch ended early because nothing was eligible.
    pub none_available: usize,
    /// Resolutions dropped because the reaper took the job back meanwhile.
    pub lease_lost: usize,
}

impl DispatchReport {
    /// Jobs claimed during the tick.
    pub fn claimed(&self) -> usize {
        self.succeeded + self.retried + self.failed + self.lease_lost
    }

    pub fn is_idle(&self) -> bool {
        self.claimed() == 0
    }
}

pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    executor: Arc<Executor>,
    decider: Arc<dyn Decider>,
    worker_id: WorkerId,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<Executor>,
        decider: Arc<dyn Decider>,
        worker_id: WorkerId,
    ) -> Self {
        Self {
            store,
            executor,
            decider,
            worker_id,
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// Process up to `batch_size` claims.
    ///
    /// Handler failures are recorded on the rows and never returned. Only
    /// store errors propagate; a job whose resolution failed stays in
    /// `processing` until the reaper reclaims it.
    pub async fn dispatch_once(&self, batch_size: usize) -> Result<DispatchReport, StoreError> {
        let mut report = DispatchReport::default();

        for _ in 0..batch_size {
            let Some(job) = self.store.claim_next(&self.worker_id).await? else {
                report.none_available = 1;
                break;
            };

            let span = info_span!(
                "job",
                job.id = %job.id,
                job.type = %job.job_type,
                attempt = job.attempt_count + 1,
            );
            self.process(job, &mut report).instrument(span).await?;
        }

        if !report.is_idle() {
            info!(
                worker_id = %self.worker_id,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                lease_lost = report.lease_lost,
                "dispatch tick finished"
            );
        }
        Ok(report)
    }

    async fn process(&self, job: Job, report: &mut DispatchReport) -> Result<(), StoreError> {
        let lease = job.lease().ok_or_else(|| StoreError::CorruptRow {
            id: job.id.to_string(),
            reason: "claimed job carries no lease".to_string(),
        })?;

        debug!("running handler");
        let outcome = self.executor.run(&job).await;
        let decision = self.decider.decide(&job, &outcome);

        let applied = match &decision {
            Decision::Complete => self.store.complete(&lease).await?,
            Decision::Retry {
                error,
                delay,
                attempt_count,
            } => {
                self.store
                    .retry(&lease, error, *delay, *attempt_count)
                    .await?
            }
            Decision::Fail {
                error,
                attempt_count,
            } => self.store.fail(&lease, error, *attempt_count).await?,
        };

        if !applied {
            warn!(outcome = outcome.kind(), "lease lost before resolution; result dropped");
            report.lease_lost += 1;
            return Ok(());
        }

        match decision {
            Decision::Complete => {
                debug!("completed");
                report.succeeded += 1;
            }
            Decision::Retry {
                error,
                delay,
                attempt_count,
            } => {
                warn!(attempt_count, ?delay, "retry scheduled: {error}");
                report.retried += 1;
            }
            Decision::Fail {
                error,
                attempt_count,
            } => {
                warn!(attempt_count, "failed permanently: {error}");
                report.failed += 1;
            }
        }
        Ok(())
    }
}
