//! Decision model: what the dispatcher does with a job after one attempt.
//!
//! `Decider` is pure: given the job snapshot and the attempt's outcome it
//! returns the next action without side effects. Applying it (the store
//! update) is the dispatcher's job.

use std::time::Duration;

use super::job::Job;
use super::outcome::Outcome;
use super::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Mark completed and clear `error_message`.
    Complete,

    /// Back to pending, eligible again after `delay`.
    Retry {
        error: String,
        delay: Duration,
        attempt_count: u32,
    },

    /// Terminal failure.
    Fail { error: String, attempt_count: u32 },
}

impl Decision {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Decision::Retry { .. })
    }
}

pub trait Decider: Send + Sync {
    fn decide(&self, job: &Job, outcome: &Outcome) -> Decision;
}

/// Attempt-based retry with exponential backoff.
///
/// - success → Complete
/// - fatal, or the incremented attempt count reaches `max_attempts` → Fail
/// - otherwise → Retry after `policy.delay_for(next)`
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

impl Decider for RetryScheduler {
    fn decide(&self, job: &Job, outcome: &Outcome) -> Decision {
        let (error, retryable) = match outcome {
            Outcome::Success(_) => return Decision::Complete,
            Outcome::Retryable(e) => (e.clone(), true),
            Outcome::Fatal(e) => (e.clone(), false),
        };

        let next = job.attempt_count.saturating_add(1);
        if !retryable || next >= job.max_attempts {
            Decision::Fail {
                error,
                attempt_count: next.min(job.max_attempts),
            }
        } else {
            Decision::Retry {
                error,
                delay: self.policy.delay_for(next),
                attempt_count: next,
            }
        }
    }
}
