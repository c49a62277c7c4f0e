//! SQL driver abstraction (C1). Opens/pings a connection pool, exposes
//! parameterized `execute`/`query` with retry on transient errors, and owns
//! the optional process-wide write-serialization mutex.

mod paramstyle;
mod retry;
mod stmt_cache;

pub use retry::{retryable, translate, MAX_OPEN_RETRIES, MAX_RETRIES};
pub use stmt_cache::StatementCache;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use sqlx::any::{install_default_drivers, AnyPoolOptions, AnyQueryResult, AnyRow};
use sqlx::AnyPool;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use crate::config::Config;
use crate::error::{CResult, Error};
use crate::telemetry::Telemetry;

/// Wraps a connection pool plus the retry/param-style/write-lock policy
/// described in spec.md §4.1. All reads and writes issued by
/// `crate::store`, `crate::compact` and `crate::watch` go through this type.
pub struct Driver {
    pool: AnyPool,
    stmts: StatementCache,
    write_lock: Option<AsyncMutex<()>>,
    telemetry: Telemetry,
}

impl Driver {
    /// Opens the pool, retrying open+ping up to `MAX_OPEN_RETRIES` times
    /// with a 1-second wait between attempts (spec.md §4.1 "Open policy").
    pub async fn open(cfg: &Config, telemetry: Telemetry) -> CResult<Self> {
        install_default_drivers();

        let max_idle = if cfg.pool.max_idle_conns < 0 { 0 } else if cfg.pool.max_idle_conns == 0 { 2 } else { cfg.pool.max_idle_conns as u32 };

        let mut attempts = 0u32;
        let pool = loop {
            let opts = AnyPoolOptions::new()
                .max_connections(cfg.pool.max_open_conns.max(1))
                .min_connections(max_idle)
                .max_lifetime(non_zero(cfg.pool.conn_max_lifetime))
                .idle_timeout(non_zero(cfg.pool.conn_max_idle_time));

            match opts.connect(&cfg.db_url).await {
                Ok(pool) => match sqlx::query("SELECT 1").execute(&pool).await {
                    Ok(_) => break pool,
                    Err(err) => {
                        attempts += 1;
                        if attempts >= MAX_OPEN_RETRIES {
                            return Err(fatal_open_error(attempts, err));
                        }
                        tracing::warn!(attempts, error = %err, "ping failed while opening SQL pool, retrying");
                        sleep(Duration::from_secs(1)).await;
                    }
                },
                Err(err) => {
                    attempts += 1;
                    if attempts >= MAX_OPEN_RETRIES {
                        return Err(fatal_open_error(attempts, err));
                    }
                    tracing::warn!(attempts, error = %err, "failed to open SQL pool, retrying");
                    sleep(Duration::from_secs(1)).await;
                }
            }
        };

        Ok(Driver {
            pool,
            stmts: StatementCache::new(cfg.param_style),
            write_lock: cfg.lock_writes.then(AsyncMutex::default),
            telemetry,
        })
    }

    /// The rewritten SQL text for a canonical (`?`-form) statement.
    pub fn sql(&self, canonical: &'static str) -> Arc<str> {
        self.stmts.get(canonical)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Runs a read query with retry. `run` is invoked fresh on every
    /// attempt since a `sqlx::Query`'s bound arguments are consumed by
    /// execution.
    pub async fn query<F, Fut>(&self, tag: &'static str, run: F) -> CResult<Vec<AnyRow>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Vec<AnyRow>, sqlx::Error>>,
    {
        retry::with_retry(&self.telemetry, tag, || async {
            run().await.map_err(|e| translate(&e))
        })
        .await
    }

    /// Runs a write with retry, serialized behind the optional write-mutex
    /// when `lock-writes` is enabled. Returns `(rows_affected,
    /// last_insert_id)`.
    pub async fn execute<F, Fut>(&self, tag: &'static str, run: F) -> CResult<(u64, i64)>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<AnyQueryResult, sqlx::Error>>,
    {
        retry::with_retry(&self.telemetry, tag, || async {
            let _guard = match &self.write_lock {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            let result = run().await.map_err(|e| translate(&e))?;
            Ok((result.rows_affected(), result.last_insert_id().unwrap_or(0)))
        })
        .await
    }

    /// Invalidates the statement cache, e.g. after the driver observes the
    /// pool was recreated following a fatal error.
    pub fn invalidate_statements(&self) {
        self.stmts.invalidate();
    }

    /// General-purpose retrying write, for callers (the revision-log engine,
    /// the compactor) that need more than one statement inside a single
    /// attempt — typically a `pool().begin()`/commit transaction. Serialized
    /// behind the optional write-mutex exactly like [`Driver::execute`].
    pub async fn transact<T, F, Fut>(&self, tag: &'static str, run: F) -> CResult<T>
    where
        F: Fn(AnyPool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let pool = self.pool.clone();
        retry::with_retry(&self.telemetry, tag, || {
            let pool = pool.clone();
            async {
                let _guard = match &self.write_lock {
                    Some(lock) => Some(lock.lock().await),
                    None => None,
                };
                run(pool).await.map_err(|e| translate(&e))
            }
        })
        .await
    }
}

fn non_zero(d: Duration) -> Option<Duration> {
    if d.is_zero() {
        None
    } else {
        Some(d)
    }
}

fn fatal_open_error(attempts: u32, err: sqlx::Error) -> Error {
    Error::Unavailable { attempts, source: Box::new(translate(&err)) }
}
