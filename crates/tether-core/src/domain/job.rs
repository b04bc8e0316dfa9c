//! Job record: the single persisted entity, and its state machine.
//!
//! State transitions:
//! - Pending -> Processing (claim)
//! - Processing -> Completed (success)
//! - Processing -> Pending (retryable failure with attempts left, or lease reclaimed by the reaper)
//! - Processing -> Failed (fatal failure or attempts exhausted)
//!
//! Completed and Failed are terminal. The transition methods below are used by the
//! in-memory store; the PostgreSQL store expresses the same transitions in SQL.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{JobId, WorkerId};

/// Attempt ceiling used when the producer does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Longest delay a job can be scheduled out (100 years). Both stores clamp
/// initial delays and retry backoff to this, so the PostgreSQL interval
/// arithmetic never overflows.
pub const MAX_SCHEDULE_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Handler lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for `scheduled_at`, then eligible for claim.
    Pending,
    /// Claimed by a worker (leased).
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Column value.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown job status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Producer-side knobs for `JobStore::enqueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::ZERO,
        }
    }
}

impl EnqueueOptions {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    /// `max_attempts` must be positive; zero is treated as "run once".
    pub fn effective_max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Proof of ownership over a claimed job.
///
/// Resolutions only apply while the row is still processing under the same
/// worker and the same `started_at`; once the reaper hands the row to someone
/// else the old lease is dead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub started_at: DateTime<Utc>,
}

/// Snapshot of a job row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub locked_by: Option<WorkerId>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        id: JobId,
        job_type: JobType,
        payload: serde_json::Value,
        options: &EnqueueOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type,
            payload,
            status: JobStatus::Pending,
            attempt_count: 0,
            max_attempts: options.effective_max_attempts(),
            scheduled_at: after(now, options.initial_delay),
            started_at: None,
            completed_at: None,
            error_message: None,
            locked_by: None,
            created_at: now,
        }
    }

    /// Pending and due.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.scheduled_at <= now
    }

    /// The lease held on this snapshot, if it was taken while processing.
    pub fn lease(&self) -> Option<Lease> {
        match (self.status, self.locked_by, self.started_at) {
            (JobStatus::Processing, Some(worker_id), Some(started_at)) => Some(Lease {
                job_id: self.id,
                worker_id,
                started_at,
            }),
            _ => None,
        }
    }

    pub fn is_held_by(&self, lease: &Lease) -> bool {
        self.lease().as_ref() == Some(lease)
    }

    pub fn mark_processing(&mut self, worker_id: WorkerId, now: DateTime<Utc>) {
        self.status = JobStatus::Processing;
        self.started_at = Some(now);
        self.completed_at = None;
        self.locked_by = Some(worker_id);
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.completed_at = Some(now);
        self.error_message = None;
        self.locked_by = None;
    }

    /// Back to pending with one more attempt on the clock.
    pub fn schedule_retry(&mut self, error: String, scheduled_at: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        self.error_message = Some(error);
        self.scheduled_at = scheduled_at;
        self.locked_by = None;
    }

    pub fn mark_failed(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.attempt_count = (self.attempt_count + 1).min(self.max_attempts);
        self.error_message = Some(error);
        self.completed_at = Some(now);
        self.locked_by = None;
    }

    /// Reaper transition: the crashed attempt is not counted.
    pub fn reclaim(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.scheduled_at = now;
        self.locked_by = None;
    }
}

/// `t + d`, with `d` clamped to `MAX_SCHEDULE_DELAY`.
pub(crate) fn after(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d.min(MAX_SCHEDULE_DELAY))
        .ok()
        .and_then(|d| t.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `t - d`, saturating at the start of representable time.
pub(crate) fn before(t: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| t.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn job(options: EnqueueOptions) -> Job {
        Job::new(
            JobId::generate(),
            JobType::new("x"),
            serde_json::json!({"k": 1}),
            &options,
            t0(),
        )
    }

    #[test]
    fn new_job_is_pending_and_due_immediately() {
        let job = job(EnqueueOptions::default());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.is_eligible(t0()));
    }

    #[test]
    fn initial_delay_postpones_eligibility() {
        let job = job(EnqueueOptions::default().with_initial_delay(Duration::from_secs(60)));
        assert!(!job.is_eligible(t0()));
        assert!(!job.is_eligible(t0() + chrono::Duration::seconds(59)));
        assert!(job.is_eligible(t0() + chrono::Duration::seconds(60)));
    }

    #[test]
    fn zero_max_attempts_is_clamped_to_one() {
        let job = job(EnqueueOptions::default().with_max_attempts(0));
        assert_eq!(job.max_attempts, 1);
    }

    #[test]
    fn lease_exists_only_while_processing() {
        let mut job = job(EnqueueOptions::default());
        assert!(job.lease().is_none());

        let worker = WorkerId::generate();
        job.mark_processing(worker, t0());
        let lease = job.lease().unwrap();
        assert_eq!(lease.worker_id, worker);
        assert!(job.is_held_by(&lease));

        job.reclaim(t0());
        assert!(job.lease().is_none());
        assert!(!job.is_held_by(&lease));
    }

    #[test]
    fn reclaim_keeps_attempt_count() {
        let mut job = job(EnqueueOptions::default());
        job.mark_processing(WorkerId::generate(), t0());
        job.schedule_retry("boom".into(), t0());
        job.mark_processing(WorkerId::generate(), t0());
        job.reclaim(t0() + chrono::Duration::minutes(5));
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_at, t0() + chrono::Duration::minutes(5));
    }

    #[test]
    fn attempt_count_never_exceeds_max_attempts() {
        let mut job = job(EnqueueOptions::default().with_max_attempts(1));
        job.mark_processing(WorkerId::generate(), t0());
        job.mark_failed("fatal".into(), t0());
        assert_eq!(job.attempt_count, 1);
        assert!(job.status.is_terminal());
        assert_eq!(job.completed_at, Some(t0()));
    }

    #[rstest]
    #[case::pending(JobStatus::Pending, "pending")]
    #[case::processing(JobStatus::Processing, "processing")]
    #[case::completed(JobStatus::Completed, "completed")]
    #[case::failed(JobStatus::Failed, "failed")]
    fn status_column_values(#[case] status: JobStatus, #[case] text: &str) {
        assert_eq!(status.as_str(), text);
        assert_eq!(text.parse::<JobStatus>().unwrap(), status);
    }

    #[test]
    fn huge_initial_delay_is_clamped() {
        let job = job(EnqueueOptions::default().with_initial_delay(Duration::MAX));
        assert_eq!(job.scheduled_at, after(t0(), MAX_SCHEDULE_DELAY));
        assert!(job.scheduled_at < DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert_eq!(
            "dead".parse::<JobStatus>(),
            Err(UnknownStatus("dead".to_string()))
        );
    }
}
