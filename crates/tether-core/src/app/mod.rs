//! App - アプリケーション層
//!
//! ports を組み合わせて queue のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: handler 登録と起動時検証
//! - **Executor**: handler の lookup / 実行 / Outcome 分類
//! - **Dispatcher**: claim → execute → decide → resolve（`dispatch_once`）
//! - **WorkerGroup**: dispatcher を回し続ける tokio task 群
//! - **ReaperLoop**: Lease 期限切れの回収

pub mod builder;
pub mod dispatcher;
pub mod executor;
pub mod reaper_loop;
pub mod registry;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder};
pub use self::dispatcher::{DispatchReport, Dispatcher};
pub use self::executor::Executor;
pub use self::reaper_loop::{ReaperHandle, ReaperLoop};
pub use self::registry::{FnHandler, HandlerRegistry, JobHandler};
pub use self::worker_loop::WorkerGroup;
