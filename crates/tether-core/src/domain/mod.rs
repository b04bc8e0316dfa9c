//! Domain model (IDs, jobs, outcomes, retry decisions).
//!
//! ストアにも実行環境にも依存しない純粋な型だけを置く。

pub mod decision;
pub mod ids;
pub mod job;
pub mod outcome;
pub mod retry;
pub mod status;

pub use decision::{Decider, Decision, RetryScheduler};
pub use ids::{Id, IdMarker, JobId, ParseIdError, WorkerId};
pub use job::{
    DEFAULT_MAX_ATTEMPTS, EnqueueOptions, Job, JobStatus, JobType, Lease, MAX_SCHEDULE_DELAY,
    UnknownStatus,
};
pub use outcome::Outcome;
pub use retry::RetryPolicy;
pub use status::QueueCounts;
