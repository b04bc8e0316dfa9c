//! Task trait - 型付き job の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const TYPE`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{EnqueueOptions, JobId, JobType};
use crate::error::StoreError;
use crate::ports::JobStore;

/// Task は job_type と payload の型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendReceipt {
///     order_id: u64,
/// }
///
/// impl Task for SendReceipt {
///     const TYPE: &'static str = "billing.send_receipt.v1";
/// }
/// ```
///
/// # 命名規約
/// - `{namespace}.{action}.v{major}`
/// - payload の互換性を壊すときは major を上げる（古い job が残っている可能性がある）
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;

    fn job_type() -> JobType {
        JobType::new(Self::TYPE)
    }
}

/// Serialize `task` and enqueue it under `T::TYPE`.
pub async fn enqueue_task<T, S>(
    store: &S,
    task: &T,
    options: EnqueueOptions,
) -> Result<JobId, StoreError>
where
    T: Task,
    S: JobStore + ?Sized,
{
    let payload = serde_json::to_value(task)?;
    store.enqueue(T::job_type(), payload, options).await
}


#[cfg(test)]
mod tests {
    use super::fixtures::Greet;
    use super::*;
    use crate::impls::InMemoryJobStore;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_task_uses_the_task_type_and_json_payload() {
        let store = InMemoryJobStore::default();
        let id = enqueue_task(
            &store,
            &Greet {
                name: "tether".into(),
            },
            EnqueueOptions::default(),
        )
        .await
        .unwrap();

        let job = store.get(&id).await.unwrap().unwrap();
        assert_eq!(job.job_type.as_str(), "test.greet.v1");
        assert_eq!(job.payload, json!({"name": "tether"}));
    }
}
