//! Executor - handler の lookup / 実行 / 結果の分類
//!
//! State-free: it never touches the store. The dispatcher applies the outcome.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::warn;

use super::registry::HandlerRegistry;
use crate::domain::{Job, Outcome};
use crate::error::HandlerError;

pub struct Executor {
    registry: Arc<HandlerRegistry>,
}

impl Executor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run the handler registered for `job.job_type` and classify the result.
    ///
    /// - no handler → `Fatal`
    /// - `HandlerError::Retryable` / `Fatal` → same
    /// - panic → `Retryable`
    pub async fn run(&self, job: &Job) -> Outcome {
        let Some(handler) = self.registry.get(&job.job_type) else {
            return Outcome::Fatal(format!("no handler for job type: {}", job.job_type));
        };

        let result = AssertUnwindSafe(handler.handle(job)).catch_unwind().await;

        match result {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(HandlerError::Retryable(e))) => Outcome::Retryable(e),
            Ok(Err(HandlerError::Fatal(e))) => Outcome::Fatal(e),
            Err(panic) => {
                let msg = panic_message(&*panic);
                warn!(job_id = %job.id, "handler panicked: {msg}");
                Outcome::Retryable(format!("handler panicked: {msg}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::registry::JobHandler;
    use crate::domain::{EnqueueOptions, JobId, JobType};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    fn job(job_type: &str) -> Job {
        Job::new(
            JobId::generate(),
            JobType::new(job_type),
            json!({"n": 2}),
            &EnqueueOptions::default(),
            Utc::now(),
        )
    }

    struct Panicking;

    #[async_trait]
    impl JobHandler for Panicking {
        async fn handle(&self, _job: &Job) -> Result<serde_json::Value, HandlerError> {
            panic!("boom");
        }
    }

    fn executor() -> Executor {
        let mut reg = HandlerRegistry::new();
        reg.register_fn(JobType::new("double"), |payload| async move {
            let n = payload["n"]
                .as_i64()
                .ok_or_else(|| HandlerError::fatal("n must be an integer"))?;
            Ok(json!(n * 2))
        })
        .unwrap();
        reg.register_fn(JobType::new("flaky"), |_| async {
            Err(anyhow::anyhow!("upstream timed out").into())
        })
        .unwrap();
        reg.register(JobType::new("panics"), Arc::new(Panicking))
            .unwrap();
        Executor::new(Arc::new(reg))
    }

    #[tokio::test]
    async fn success_carries_the_handler_value() {
        assert_eq!(executor().run(&job("double")).await, Outcome::Success(json!(4)));
    }

    #[tokio::test]
    async fn missing_handler_is_fatal() {
        assert_eq!(
            executor().run(&job("nope")).await,
            Outcome::Fatal("no handler for job type: nope".into())
        );
    }

    #[tokio::test]
    async fn untyped_errors_default_to_retryable() {
        assert_eq!(
            executor().run(&job("flaky")).await,
            Outcome::Retryable("upstream timed out".into())
        );
    }

    #[tokio::test]
    async fn explicit_fatal_is_kept() {
        let mut bad = job("double");
        bad.payload = json!({"n": "two"});
        assert_eq!(
            executor().run(&bad).await,
            Outcome::Fatal("n must be an integer".into())
        );
    }

    #[tokio::test]
    async fn panic_is_caught_as_retryable() {
        let outcome = executor().run(&job("panics")).await;
        assert_eq!(outcome, Outcome::Retryable("handler panicked: boom".into()));
    }
}
