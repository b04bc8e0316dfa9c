//! Handler trait - 型付き Task を実行する Handler
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<T>`)
//! - Type erasure パターン (`TypedHandler<T, H>` → `dyn JobHandler`)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::app::registry::JobHandler;
use crate::domain::Job;
use crate::error::HandlerError;

/// Handler は decode 済みの Task を受け取る
///
/// `Handler<Greet>` は `Greet` しか受け取れないので、job_type と payload 型の
/// 対応はコンパイル時に保証される。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<serde_json::Value, HandlerError>;
}

/// `Handler<T>` を object-safe な `JobHandler` に変換する
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T> + 'static> JobHandler for TypedHandler<T, H> {
    async fn handle(&self, job: &Job) -> Result<serde_json::Value, HandlerError> {
        // 同じ payload を何度 retry しても decode は直らない
        let task: T = serde_json::from_value(job.payload.clone())
            .map_err(|e| HandlerError::fatal(format!("payload decode for {}: {e}", T::TYPE)))?;
        self.handler.handle(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnqueueOptions, JobId};
    use crate::typed::task::fixtures::Greet;
    use chrono::Utc;
    use serde_json::json;

    struct GreetHandler;

    #[async_trait]
    impl Handler<Greet> for GreetHandler {
        async fn handle(&self, task: Greet) -> Result<serde_json::Value, HandlerError> {
            Ok(json!(format!("hello, {}", task.name)))
        }
    }

    fn job(payload: serde_json::Value) -> Job {
        Job::new(
            JobId::generate(),
            Greet::job_type(),
            payload,
            &EnqueueOptions::default(),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn decodes_payload_into_the_task() {
        let handler = TypedHandler::<Greet, _>::new(GreetHandler);
        let value = handler.handle(&job(json!({"name": "tether"}))).await.unwrap();
        assert_eq!(value, json!("hello, tether"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_fatal() {
        let handler = TypedHandler::<Greet, _>::new(GreetHandler);
        let err = handler.handle(&job(json!({"nom": 1}))).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("test.greet.v1"));
    }
}
