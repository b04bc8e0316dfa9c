use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::app::{AppBuilder, ReaperLoop};
use tether_core::config::QueueConfig;
use tether_core::domain::{EnqueueOptions, Job, JobId};
use tether_core::error::HandlerError;
use tether_core::impls::{InMemoryJobStore, PgJobStore};
use tether_core::ports::{JobStore, SystemClock, UlidGenerator};
use tether_core::typed::{Handler, Task, enqueue_task};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Task for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

/// Fails the first `n` times, then greets.
struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: Hello) -> Result<serde_json::Value, HandlerError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(HandlerError::retryable(format!(
                "intentional failure (left={left})"
            )));
        }

        info!("Hello, {}!", task.name);
        Ok(serde_json::json!({ "greeted": task.name }))
    }
}

/// `RUST_LOG` filters (default `info`); `TETHER_LOG_JSON=true` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TETHER_LOG_JSON")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

async fn open_store(config: &QueueConfig) -> anyhow::Result<Arc<dyn JobStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgJobStore::connect(url, config.max_connections)
                .await
                .context("connecting to PostgreSQL")?;
            store
                .install_schema()
                .await
                .context("installing tether_jobs schema")?;
            info!("using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            info!("TETHER_DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(InMemoryJobStore::default()))
        }
    }
}

/// Poll until the job reaches a terminal state.
async fn wait_for_terminal(store: &dyn JobStore, id: &JobId) -> anyhow::Result<Job> {
    loop {
        let job = store
            .get(id)
            .await?
            .with_context(|| format!("job {id} disappeared"))?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        sleep(Duration::from_millis(100)).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = QueueConfig::from_env()?;
    let store = open_store(&config).await?;

    let app = AppBuilder::new()
        .register_task::<Hello, _>(HelloHandler::new(2))?
        .expect_job_types(&[Hello::TYPE])
        .retry_policy(config.retry.clone())
        .build()?;

    let reaper = ReaperLoop::new(Arc::clone(&store), config.reaper.clone()).spawn();
    let workers = app.spawn_workers(
        &config.dispatcher,
        Arc::clone(&store),
        &UlidGenerator::new(SystemClock),
    );

    let id = enqueue_task(
        &*store,
        &Hello {
            name: "tether".into(),
        },
        EnqueueOptions::default().with_max_attempts(5),
    )
    .await?;
    info!(job_id = %id, "enqueued");

    tokio::select! {
        job = wait_for_terminal(&*store, &id) => {
            let job = job?;
            info!(
                status = %job.status,
                attempts = job.attempt_count,
                last_error = ?job.error_message,
                "final status"
            );
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; shutting down");
        }
    }

    workers.shutdown_and_join().await;
    reaper.shutdown_and_join().await;
    info!(counts = ?store.counts().await?, "queue counts");
    Ok(())
}
