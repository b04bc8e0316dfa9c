//! tether-core
//!
//! Durable, lease-based job queue on PostgreSQL.
//!
//! - **domain**: ドメインモデル（ids, job, outcome, retry, decision）
//! - **ports**: 抽象化レイヤー（JobStore, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, executor, dispatcher, worker_loop, reaper_loop）
//! - **typed**: 型付き Task API（Task trait, Handler trait）
//! - **impls**: JobStore 実装（InMemoryJobStore, PgJobStore）

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;
pub mod typed;

pub use app::{App, AppBuilder, DispatchReport, Dispatcher, ReaperLoop, WorkerGroup};
pub use config::{ConfigError, QueueConfig};
pub use domain::{EnqueueOptions, Job, JobId, JobStatus, JobType, Outcome, WorkerId};
pub use error::{BuildError, HandlerError, RegistryError, StoreError};
pub use ports::JobStore;
