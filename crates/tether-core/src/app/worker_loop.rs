//! WorkerGroup - dispatch_once を回し続ける tokio task 群
//!
//! - 各 worker は自分の `WorkerId` を持つ（`locked_by` に記録される）
//! - 空振り / StoreError のときは poll_interval + jitter だけ待つ
//! - shutdown は `watch` channel で協調的に。実行中の handler は最後まで走る

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span};

use super::dispatcher::Dispatcher;
use super::executor::Executor;
use crate::config::DispatcherConfig;
use crate::domain::Decider;
use crate::ports::{IdGenerator, JobStore};

/// Worker group handle.
/// - `request_shutdown()` で新しい claim を止める
/// - `shutdown_and_join()` で全ワーカーの終了を待つ
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `config.workers` dispatcher loops.
    pub fn spawn(
        config: &DispatcherConfig,
        store: Arc<dyn JobStore>,
        executor: Arc<Executor>,
        decider: Arc<dyn Decider>,
        ids: &dyn IdGenerator,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let dispatcher = Dispatcher::new(
                Arc::clone(&store),
                Arc::clone(&executor),
                Arc::clone(&decider),
                ids.generate_worker_id(),
            );
            let span = info_span!("worker", worker.id = %dispatcher.worker_id());
            let poll = PollSchedule::new(config.poll_interval, config.poll_jitter);
            let rx = shutdown_rx.clone();

            let join = tokio::spawn(
                worker_loop(dispatcher, config.batch_size, poll, rx).instrument(span),
            );
            joins.push(join);
        }

        info!(workers = joins.len(), "worker group started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new claims. Does not cancel in-flight handlers.
    pub fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for j in self.joins {
            if let Err(e) = j.await {
                error!("worker task ended abnormally: {e}");
            }
        }
        info!("worker group stopped");
    }
}

#[derive(Debug, Clone, Copy)]
struct PollSchedule {
    interval: Duration,
    jitter: Duration,
}

impl PollSchedule {
    fn new(interval: Duration, jitter: Duration) -> Self {
        Self { interval, jitter }
    }

    fn next_sleep(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.interval;
        }
        let jitter_millis = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        self.interval + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_millis))
    }
}

async fn worker_loop(
    dispatcher: Dispatcher,
    batch_size: usize,
    poll: PollSchedule,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let idle = match dispatcher.dispatch_once(batch_size).await {
            // a full batch means there is probably more; go again right away
            Ok(report) => report.none_available > 0,
            Err(e) => {
                error!("dispatch tick failed: {e}");
                true
            }
        };

        if idle {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    // sender dropped: the group is gone
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(poll.next_sleep()) => {}
            }
        }
    }
    debug!("worker stopped");
}
