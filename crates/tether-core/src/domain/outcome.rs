//! Outcome model: classification of a single handler invocation.
//!
//! The executor produces an `Outcome`; the retry scheduler turns it into a
//! `Decision`. Nothing here touches the store.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Handler finished; the value is only logged, never persisted.
    Success(serde_json::Value),

    /// Transient failure (worth retrying while attempts remain).
    Retryable(String),

    /// Permanent failure; the job goes straight to `failed`.
    Fatal(String),
}

impl Outcome {
    pub fn success() -> Self {
        Outcome::Success(serde_json::Value::Null)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Error text for failures, `None` on success.
    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Retryable(e) | Outcome::Fatal(e) => Some(e),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Retryable(_) => "retryable",
            Outcome::Fatal(_) => "fatal",
        }
    }
}
