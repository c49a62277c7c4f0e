//! Lifecycle supervisor (C8). Opens the driver, runs migrations, launches
//! the compactor and poller, and drains them on shutdown within a bounded
//! budget (spec.md §4.7).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::compact::Compactor;
use crate::config::Config;
use crate::driver::Driver;
use crate::error::{CResult, Error};
use crate::schema;
use crate::store::Store;
use crate::telemetry::Telemetry;
use crate::watch::WatchHub;

/// Shutdown is given this long to drain the compactor and poller before the
/// supervisor gives up and returns anyway (spec.md §4.7).
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(30);

/// Owns the engine's background tasks and the shared SQL driver. Construct
/// with [`Supervisor::start`]; call [`Supervisor::shutdown`] exactly once,
/// typically from a signal handler in the binary crate.
pub struct Supervisor {
    store: Store,
    watch_hub: Arc<WatchHub>,
    telemetry: Telemetry,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    /// Opens the connection pool, runs schema migrations, and spawns the
    /// compactor and poller tasks.
    pub async fn start(cfg: &Config) -> CResult<Self> {
        let cfg = cfg.clone().normalize();
        let telemetry = Telemetry::new();
        let driver = Arc::new(Driver::open(&cfg, telemetry.clone()).await?);
        schema::migrate(&driver).await?;

        let store = Store::new(driver.clone(), telemetry.clone());
        let watch_hub = Arc::new(WatchHub::new(
            store.clone(),
            telemetry.clone(),
            cfg.poll_interval,
            cfg.watch_query_timeout,
            cfg.watch_batch_limit,
        ));
        watch_hub.start().await?;

        let compactor = Arc::new(Compactor::new(store.clone(), telemetry.clone(), cfg.compact_interval));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut tasks = Vec::new();
        {
            let compactor = compactor.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { compactor.run(rx).await }));
        }
        {
            let watch_hub = watch_hub.clone();
            let rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move { watch_hub.run(rx).await }));
        }

        tracing::info!("supervisor started, compactor and poller running");
        Ok(Supervisor { store, watch_hub, telemetry, shutdown_tx, tasks })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn watch_hub(&self) -> &Arc<WatchHub> {
        &self.watch_hub
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Signals both background tasks to stop and waits up to
    /// [`SHUTDOWN_BUDGET`] for them to drain, then returns regardless.
    pub async fn shutdown(mut self) -> CResult<()> {
        tracing::info!("supervisor shutting down");
        let _ = self.shutdown_tx.send(true);

        let drain = async {
            for task in self.tasks.drain(..) {
                if let Err(err) = task.await {
                    tracing::warn!(error = %err, "background task panicked during shutdown");
                }
            }
        };

        if tokio::time::timeout(SHUTDOWN_BUDGET, drain).await.is_err() {
            tracing::warn!(budget_secs = SHUTDOWN_BUDGET.as_secs(), "shutdown budget exceeded, returning anyway");
            return Err(Error::Closed("shutdown budget exceeded".to_string()));
        }

        tracing::info!("supervisor shutdown complete");
        Ok(())
    }
}
