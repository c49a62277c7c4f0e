//! Shared test scaffolding: an in-memory sqlite-backed `Store`. A single
//! connection is forced so the in-memory database is actually shared across
//! every statement in the pool (sqlite's `:memory:` otherwise gives each
//! connection its own empty database).

use kine::compact::Compactor;
use kine::config::{Config, PoolConfig};
use kine::driver::Driver;
use kine::error::CResult;
use kine::schema;
use kine::store::Store;
use kine::telemetry::Telemetry;
use kine::watch::WatchHub;
use std::sync::Arc;
use std::time::Duration;

pub async fn new_store() -> CResult<Store> {
    let cfg = Config {
        db_url: "sqlite::memory:".to_string(),
        pool: PoolConfig { max_open_conns: 1, ..PoolConfig::default() },
        ..Config::default()
    }
    .normalize();

    let telemetry = Telemetry::new();
    let driver = Arc::new(Driver::open(&cfg, telemetry.clone()).await?);
    schema::migrate(&driver).await?;
    Ok(Store::new(driver, telemetry))
}

pub fn new_compactor(store: Store) -> Compactor {
    Compactor::new(store, Telemetry::new(), Duration::from_secs(300))
}

pub async fn new_watch_hub(store: Store, poll_interval: Duration) -> CResult<Arc<WatchHub>> {
    let hub = Arc::new(WatchHub::new(store, Telemetry::new(), poll_interval, Duration::from_secs(5), 500));
    hub.start().await?;
    Ok(hub)
}
