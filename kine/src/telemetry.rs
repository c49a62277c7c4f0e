//! Telemetry surface (C7). Purely observational: counters plus `tracing`
//! spans, no external exporter. A `Telemetry` handle is cheap to clone and
//! shared by the revision-log engine, the compactor and the poller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    fills: AtomicU64,
    compacts: AtomicU64,
    watch_events: AtomicU64,
    sql_retries: AtomicU64,
    sql_errors: AtomicU64,
}

/// Outcome of a single operation, used to pick the counter and log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    CasMiss,
    Err,
}

#[derive(Clone, Debug, Default)]
pub struct Telemetry(Arc<Counters>);

impl Telemetry {
    pub fn new() -> Self {
        Telemetry(Arc::new(Counters::default()))
    }

    pub fn record_op(&self, op: &'static str, outcome: Outcome) {
        match (op, outcome) {
            ("create", Outcome::Ok) => self.0.creates.fetch_add(1, Ordering::Relaxed),
            ("update", Outcome::Ok) => self.0.updates.fetch_add(1, Ordering::Relaxed),
            ("delete", Outcome::Ok) => self.0.deletes.fetch_add(1, Ordering::Relaxed),
            ("fill", Outcome::Ok) => self.0.fills.fetch_add(1, Ordering::Relaxed),
            ("compact", Outcome::Ok) => self.0.compacts.fetch_add(1, Ordering::Relaxed),
            (_, Outcome::Err) => self.0.sql_errors.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
        match outcome {
            Outcome::Ok => tracing::debug!(op, "operation completed"),
            Outcome::CasMiss => tracing::trace!(op, "cas miss"),
            Outcome::Err => tracing::warn!(op, "operation failed"),
        }
    }

    pub fn record_tx(&self, name: &'static str, outcome: Outcome, duration: Duration) {
        self.record_op(name, outcome);
        tracing::debug!(tx = name, ?outcome, micros = duration.as_micros() as u64, "transaction outcome");
    }

    pub fn record_retry(&self) {
        self.0.sql_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watch_event(&self) {
        self.0.watch_events.fetch_add(1, Ordering::Relaxed);
    }

    /// A point-in-time snapshot, used by tests and (if ever wired) an
    /// external exporter.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            creates: self.0.creates.load(Ordering::Relaxed),
            updates: self.0.updates.load(Ordering::Relaxed),
            deletes: self.0.deletes.load(Ordering::Relaxed),
            fills: self.0.fills.load(Ordering::Relaxed),
            compacts: self.0.compacts.load(Ordering::Relaxed),
            watch_events: self.0.watch_events.load(Ordering::Relaxed),
            sql_retries: self.0.sql_retries.load(Ordering::Relaxed),
            sql_errors: self.0.sql_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub fills: u64,
    pub compacts: u64,
    pub watch_events: u64,
    pub sql_retries: u64,
    pub sql_errors: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counts_ops_by_kind() {
        let t = Telemetry::new();
        t.record_op("create", Outcome::Ok);
        t.record_op("create", Outcome::Ok);
        t.record_op("update", Outcome::CasMiss);
        t.record_retry();

        let snap = t.snapshot();
        assert_eq!(snap.creates, 2);
        assert_eq!(snap.updates, 0);
        assert_eq!(snap.sql_retries, 1);
    }
}
