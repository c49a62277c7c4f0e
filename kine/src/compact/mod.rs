//! Compactor (C5). A background task that periodically trims rows made
//! obsolete by later writes, advancing the compact watermark held in the
//! `compact_rev_key` sentinel row (spec.md §4.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::error::{CResult, Short};
use crate::schema::COMPACT_REV_KEY;
use crate::store::Store;
use crate::telemetry::{Outcome, Telemetry};

/// What a single compaction pass did, for logging/tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactOutcome {
    pub compact_revision: i64,
    pub ran: bool,
}

/// Owns the periodic compaction loop. Cheap to clone (shares the store).
#[derive(Clone)]
pub struct Compactor {
    store: Store,
    telemetry: Telemetry,
    interval: Duration,
}

impl Compactor {
    pub fn new(store: Store, telemetry: Telemetry, interval: Duration) -> Self {
        Compactor { store, telemetry, interval }
    }

    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Runs one compaction pass against `requested` as the caller's desired
    /// target revision (spec.md §4.5 "Algorithm"). Typically `requested` is
    /// the current revision at the time the pass is scheduled.
    pub async fn compact_once(&self, requested: i64) -> CResult<CompactOutcome> {
        let (compact, current) = self.store.get_compact_revision().await?;
        let target = requested.min(current);
        if compact >= target {
            return Ok(CompactOutcome { compact_revision: compact, ran: false });
        }

        let driver = self.store.driver().clone();
        let delete_superseded_sql = driver.sql(
            "DELETE FROM kine WHERE id IN ( \
                 SELECT prev_revision FROM kine \
                 WHERE id > ? AND id <= ? AND name != ? AND created = 0 AND prev_revision != 0 \
             )",
        );
        let delete_tombstones_sql =
            driver.sql("DELETE FROM kine WHERE id > ? AND id <= ? AND deleted = 1");
        let advance_marker_sql = driver.sql(
            "UPDATE kine SET prev_revision = CASE WHEN prev_revision < ? THEN ? ELSE prev_revision END \
             WHERE name = ?",
        );

        let start = Instant::now();
        let result = driver
            .transact("compact", move |pool| {
                let delete_superseded_sql = delete_superseded_sql.clone();
                let delete_tombstones_sql = delete_tombstones_sql.clone();
                let advance_marker_sql = advance_marker_sql.clone();
                async move {
                    let mut tx = pool.begin().await?;
                    sqlx::query(&delete_superseded_sql)
                        .bind(compact)
                        .bind(target)
                        .bind(COMPACT_REV_KEY)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(&delete_tombstones_sql)
                        .bind(compact)
                        .bind(target)
                        .execute(&mut *tx)
                        .await?;
                    sqlx::query(&advance_marker_sql)
                        .bind(target)
                        .bind(target)
                        .bind(COMPACT_REV_KEY)
                        .execute(&mut *tx)
                        .await?;
                    tx.commit().await?;
                    Ok(())
                }
            })
            .await;

        match result {
            Ok(()) => {
                self.telemetry.record_tx("compact", Outcome::Ok, start.elapsed());
                Ok(CompactOutcome { compact_revision: target, ran: true })
            }
            Err(err) => {
                self.telemetry.record_tx("compact", Outcome::Err, start.elapsed());
                Err(err)
            }
        }
    }

    /// Runs the periodic loop until `shutdown` signals true. Never aborts on
    /// a single failed pass; logs and continues at the next tick (spec.md
    /// §7, "Background tasks ... never terminate on a single error").
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        if !self.enabled() {
            tracing::info!("compactor disabled (compact-interval = 0)");
            return;
        }
        let mut ticker = tokio::time::interval(self.interval);
        ticker.tick().await; // first tick fires immediately; skip it.

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.store.current_revision().await {
                        Ok(current) => match self.compact_once(current).await {
                            Ok(outcome) if outcome.ran => {
                                tracing::info!(compact_revision = outcome.compact_revision, "compaction pass completed");
                            }
                            Ok(_) => tracing::trace!("compaction pass was a no-op"),
                            Err(err) => tracing::warn!(error = %Short(&err), "compaction pass failed, will retry next tick"),
                        },
                        Err(err) => tracing::warn!(error = %Short(&err), "failed to read current revision for compaction"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("compactor shutting down");
                        return;
                    }
                }
            }
        }
    }
}
