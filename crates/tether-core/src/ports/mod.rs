//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。
//! - PostgreSQL が source of truth（正本）。claim の排他は行ロックだけで実現する
//! - 時刻と ID 生成は差し替え可能（テストでは FixedClock）

pub mod clock;
pub mod id_generator;
pub mod job_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_store::JobStore;
