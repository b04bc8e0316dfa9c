//! Typed - 型付き Task API
//!
//! job_type の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `app::JobHandler` - object-safe。registry はこちらだけを扱う

pub mod handler;
pub mod task;

pub use self::handler::{Handler, TypedHandler};
pub use self::task::{Task, enqueue_task};
