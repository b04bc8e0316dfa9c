//! Impls - JobStore の実装
//!
//! - **InMemoryJobStore**: テスト・デモ用（Clock 注入で時間を操作できる）
//! - **PgJobStore**: 本番用。`FOR UPDATE SKIP LOCKED` で claim を排他

pub mod memory;
pub mod postgres;

pub use self::memory::InMemoryJobStore;
pub use self::postgres::PgJobStore;
