//! Watch / poll pipeline (C6). A single shared poller tails the log and
//! fans out filtered events to subscriptions (spec.md §4.6).

use std::pin::Pin;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

use crate::error::{CResult, Error, Short};
use crate::schema::COMPACT_REV_KEY;
use crate::store::{LogRow, Store};
use crate::telemetry::Telemetry;

/// Depth of a subscription's delivery buffer before it is torn down as a
/// slow consumer (spec.md §4.6 "Backpressure").
const SUBSCRIPTION_BUFFER: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Put,
    Delete,
}

/// A materialized key/value as of a particular revision.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub lease: i64,
}

/// A single change event delivered to a watcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub kv: KeyValue,
    pub prev_kv: Option<KeyValue>,
}

/// A live subscription's event stream. Wraps a bounded channel; dropping it
/// unsubscribes.
pub struct Watcher {
    id: u64,
    inner: ReceiverStream<CResult<Event>>,
}

impl Watcher {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Stream for Watcher {
    type Item = CResult<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

struct Subscription {
    id: u64,
    prefix: String,
    start_rev: i64,
    sender: mpsc::Sender<CResult<Event>>,
}

/// Owns the shared poller and the set of live subscriptions.
pub struct WatchHub {
    store: Store,
    telemetry: Telemetry,
    poll_interval: Duration,
    watch_query_timeout: Duration,
    batch_limit: i64,
    subs: Mutex<Vec<Subscription>>,
    next_sub_id: AtomicU64,
    last_seen_id: AtomicI64,
}

impl WatchHub {
    pub fn new(
        store: Store,
        telemetry: Telemetry,
        poll_interval: Duration,
        watch_query_timeout: Duration,
        batch_limit: i64,
    ) -> Self {
        WatchHub {
            store,
            telemetry,
            poll_interval,
            watch_query_timeout,
            batch_limit,
            subs: Mutex::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
            last_seen_id: AtomicI64::new(0),
        }
    }

    /// Subscribes to changes under `prefix` strictly after `start_rev`.
    /// Rejects with `Compacted` if `start_rev` predates the compact
    /// watermark (spec.md §4.6 "Compaction interaction"). Performs a
    /// one-shot historical catch-up read before registering the live
    /// subscription, so the invariant "delivered ids form a strictly
    /// increasing sequence starting at the least id > start_rev" holds
    /// regardless of when the caller subscribes.
    pub async fn watch(&self, prefix: impl Into<String>, start_rev: i64) -> CResult<Watcher> {
        let prefix = prefix.into();
        let (compact_rev, now) = self.store.get_compact_revision().await?;
        if start_rev < compact_rev {
            return Err(Error::Compacted);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut high_water = start_rev;

        if start_rev < now {
            let backlog = self.store.after_prefix(&prefix, start_rev, 0).await?;
            for row in backlog.iter().filter(|r| r.id <= now) {
                high_water = high_water.max(row.id);
                if let Some(event) = to_event(row) {
                    if tx.try_send(Ok(event)).is_err() {
                        let _ = tx.try_send(Err(Error::SlowConsumer));
                        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
                        return Ok(Watcher { id, inner: ReceiverStream::new(rx) });
                    }
                }
            }
        }

        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);
        self.subs.lock().unwrap().push(Subscription { id, prefix, start_rev: high_water, sender: tx });
        Ok(Watcher { id, inner: ReceiverStream::new(rx) })
    }

    /// Initializes `last_seen_id` to the current revision (spec.md §4.6
    /// "Architecture"). Must run once before [`WatchHub::run`].
    pub async fn start(&self) -> CResult<()> {
        let current = self.store.current_revision().await?;
        self.last_seen_id.store(current, Ordering::SeqCst);
        Ok(())
    }

    /// Runs the periodic poll loop until `shutdown` signals true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    loop {
                        match self.poll_once().await {
                            Ok(capped) if capped => continue,
                            Ok(_) => break,
                            Err(err) => {
                                tracing::warn!(error = %Short(&err), "watch poll tick failed, will retry next tick");
                                break;
                            }
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("watch poller shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One poll tick: reads the tail, fans out events, advances
    /// `last_seen_id`, and fills any gap it finds — whether the tail is
    /// entirely empty, or a discontinuity sits between two rows of a
    /// non-empty batch (spec.md §8 "Boundary behaviors": ids 5 and 7 exist
    /// but 6 is missing, so the poller must insert gap-6 itself). Returns
    /// whether the batch was capped by `batch_limit` (caller should re-poll
    /// immediately).
    async fn poll_once(&self) -> CResult<bool> {
        let last_seen = self.last_seen_id.load(Ordering::SeqCst);
        let rows = match tokio::time::timeout(self.watch_query_timeout, self.store.after(last_seen, self.batch_limit)).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(last_seen, "watch poll query timed out");
                return Ok(false);
            }
        };

        if rows.is_empty() {
            let current = self.store.current_revision().await?;
            if current > last_seen {
                self.fill_gap(last_seen + 1, current).await?;
                self.last_seen_id.store(current, Ordering::SeqCst);
            }
            return Ok(false);
        }

        let capped = self.batch_limit > 0 && rows.len() as i64 >= self.batch_limit;
        let mut cursor = last_seen;
        for row in &rows {
            if row.id > cursor + 1 {
                self.fill_gap(cursor + 1, row.id - 1).await?;
            }
            cursor = row.id;
            if let Some(event) = to_event(row) {
                self.fan_out(row, event);
            }
        }
        self.last_seen_id.store(cursor, Ordering::SeqCst);
        Ok(capped)
    }

    async fn fill_gap(&self, from: i64, to: i64) -> CResult<()> {
        for rev in from..=to {
            match self.store.fill(rev).await {
                Ok(()) => {}
                Err(Error::ConstraintViolation(_)) => {
                    // Someone else already wrote this id; nothing to fill.
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn fan_out(&self, row: &LogRow, event: Event) {
        let mut subs = self.subs.lock().unwrap();
        subs.retain_mut(|sub| {
            if row.id <= sub.start_rev || !row.name.starts_with(&sub.prefix) {
                return true;
            }
            self.telemetry.record_watch_event();
            match sub.sender.try_send(Ok(event.clone())) {
                Ok(()) => true,
                Err(_) => {
                    let _ = sub.sender.try_send(Err(Error::SlowConsumer));
                    false
                }
            }
        });
    }
}

fn to_event(row: &LogRow) -> Option<Event> {
    if row.name.starts_with("gap-") || row.name == COMPACT_REV_KEY {
        return None;
    }
    let kind = if row.deleted { EventKind::Delete } else { EventKind::Put };
    let kv = KeyValue {
        key: row.name.clone(),
        value: row.value.clone().unwrap_or_default(),
        create_revision: row.create_revision,
        mod_revision: row.id,
        lease: row.lease,
    };
    let prev_kv = row.old_value.clone().map(|v| KeyValue {
        key: row.name.clone(),
        value: v,
        create_revision: row.create_revision,
        mod_revision: row.prev_revision,
        lease: row.lease,
    });
    Some(Event { kind, kv, prev_kv })
}
