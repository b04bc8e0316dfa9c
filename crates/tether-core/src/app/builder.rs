//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - handler 登録は起動時に一度だけ。二重登録は `RegistryError`
//! - `expect_job_types()` で期待される job_type を宣言
//! - `build()` 時に「期待集合 ⊆ 登録済み集合」をチェックし、不足があれば `BuildError`

use std::future::Future;
use std::sync::Arc;

use super::dispatcher::Dispatcher;
use super::executor::Executor;
use super::registry::{HandlerRegistry, JobHandler};
use super::worker_loop::WorkerGroup;
use crate::config::DispatcherConfig;
use crate::domain::{Decider, JobType, RetryPolicy, RetryScheduler, WorkerId};
use crate::error::{BuildError, HandlerError, RegistryError};
use crate::ports::{IdGenerator, JobStore};
use crate::typed::{Handler, Task, TypedHandler};

/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .register_task::<SendReceipt, _>(SendReceiptHandler)?
///     .register_fn("cleanup", |payload| async move { Ok(payload) })?
///     .expect_job_types(&[SendReceipt::TYPE, "cleanup"])
///     .build()?;
/// let workers = app.spawn_workers(&config.dispatcher, store, &ids);
/// ```
pub struct AppBuilder {
    registry: HandlerRegistry,
    expected: Option<Vec<JobType>>,
    retry_policy: RetryPolicy,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: HandlerRegistry::new(),
            expected: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn register(
        mut self,
        job_type: impl Into<JobType>,
        handler: impl JobHandler + 'static,
    ) -> Result<Self, RegistryError> {
        self.registry.register(job_type.into(), Arc::new(handler))?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(
        mut self,
        job_type: impl Into<JobType>,
        f: F,
    ) -> Result<Self, RegistryError>
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(job_type.into(), f)?;
        Ok(self)
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register_task<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry
            .register(T::job_type(), Arc::new(TypedHandler::<T, H>::new(handler)))?;
        Ok(self)
    }

    pub fn expect_job_types(mut self, job_types: &[&str]) -> Self {
        self.expected = Some(job_types.iter().map(|&t| JobType::new(t)).collect());
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected {
            let missing: Vec<JobType> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingJobTypes(missing));
            }
        }
        Ok(App {
            executor: Arc::new(Executor::new(Arc::new(self.registry))),
            decider: Arc::new(RetryScheduler::new(self.retry_policy)),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handlers and retry policy, ready to be attached to a store.
pub struct App {
    executor: Arc<Executor>,
    decider: Arc<dyn Decider>,
}

impl App {
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// A single dispatcher, for callers that drive `dispatch_once` themselves
    /// (cron, tests).
    pub fn dispatcher(&self, store: Arc<dyn JobStore>, worker_id: WorkerId) -> Dispatcher {
        Dispatcher::new(
            store,
            Arc::clone(&self.executor),
            Arc::clone(&self.decider),
            worker_id,
        )
    }

    pub fn spawn_workers(
        &self,
        config: &DispatcherConfig,
        store: Arc<dyn JobStore>,
        ids: &dyn IdGenerator,
    ) -> WorkerGroup {
        WorkerGroup::spawn(
            config,
            store,
            Arc::clone(&self.executor),
            Arc::clone(&self.decider),
            ids,
        )
    }
}
