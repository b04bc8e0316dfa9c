//! ReaperLoop - Lease 期限切れの回収
//!
//! processing のまま `lease_timeout` を超えた job（worker が落ちた等）を
//! pending に戻す。attempt_count は変えない。
//! StoreError はログだけ出して次の tick で再試行する。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::ReaperConfig;
use crate::domain::JobId;
use crate::error::StoreError;
use crate::ports::JobStore;

pub struct ReaperLoop {
    store: Arc<dyn JobStore>,
    config: ReaperConfig,
}

impl ReaperLoop {
    pub fn new(store: Arc<dyn JobStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// One sweep.
    pub async fn tick(&self) -> Result<Vec<JobId>, StoreError> {
        let reclaimed = self.store.reclaim_stale(self.config.lease_timeout).await?;
        if reclaimed.is_empty() {
            debug!("no stale leases");
        } else {
            warn!(
                count = reclaimed.len(),
                jobs = ?reclaimed,
                "reclaimed jobs with expired leases"
            );
        }
        Ok(reclaimed)
    }

    /// Sweep every `interval` until `shutdown` flips to true (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval = ?self.config.interval,
            lease_timeout = ?self.config.lease_timeout,
            "reaper started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("reaper sweep failed: {e}");
                    }
                }
            }
        }
        info!("reaper stopped");
    }

    pub fn spawn(self) -> ReaperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(self.run(shutdown_rx));
        ReaperHandle { shutdown_tx, join }
    }
}

pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown_and_join(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.join.await {
            error!("reaper task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnqueueOptions, JobStatus, JobType, WorkerId};
    use crate::impls::InMemoryJobStore;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn tick_reclaims_only_expired_leases() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryJobStore::new(clock.clone()));
        let old = store
            .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        store.claim_next(&WorkerId::generate()).await.unwrap();

        clock.advance(Duration::from_secs(200));
        let fresh = store
            .enqueue(JobType::new("x"), json!({}), EnqueueOptions::default())
            .await
            .unwrap();
        store.claim_next(&WorkerId::generate()).await.unwrap();

        let reaper = ReaperLoop::new(
            store.clone(),
            ReaperConfig {
                lease_timeout: Duration::from_secs(120),
                interval: Duration::from_secs(30),
            },
        );
        assert_eq!(reaper.tick().await.unwrap(), vec![old]);
        assert_eq!(
            store.get(&old).await.unwrap().unwrap().status,
            JobStatus::Pending
        );
        assert_eq!(
            store.get(&fresh).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn spawned_reaper_stops_on_shutdown() {
        let reaper = ReaperLoop::new(
            Arc::new(InMemoryJobStore::default()),
            ReaperConfig {
                lease_timeout: Duration::from_secs(1),
                interval: Duration::from_millis(5),
            },
        );
        let handle = reaper.spawn();
        tokio::time::sleep(Duration::from_millis(20)).await;
        tokio::time::timeout(Duration::from_secs(1), handle.shutdown_and_join())
            .await
            .unwrap();
    }
}
