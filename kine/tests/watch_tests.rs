mod support;

use std::time::Duration;

use kine::error::Error;
use kine::watch::EventKind;
use sqlx::Row;
use tokio_stream::StreamExt;

/// End-to-end scenario 5: subscribing before any writes happen delivers
/// every subsequent event in id order.
#[tokio::test]
async fn watch_delivers_events_in_order_from_the_start() {
    let store = support::new_store().await.unwrap();
    let hub = support::new_watch_hub(store.clone(), Duration::from_millis(20)).await.unwrap();

    let mut watcher = hub.watch("foo", 0).await.unwrap();

    let shutdown = tokio::sync::watch::channel(false).1;
    let hub_clone = hub.clone();
    let poller = tokio::spawn(async move { hub_clone.run(shutdown).await });

    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    let (rev2, _) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap();
    let (rev3, _) = store.delete("foo", rev2).await.unwrap();
    let (_rev4, _) = store.create("foo", b"x".to_vec(), 0).await.unwrap();

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let event = tokio::time::timeout(Duration::from_secs(2), watcher.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended early")
            .expect("event error");
        kinds.push(event.kind);
    }

    assert_eq!(kinds, vec![EventKind::Put, EventKind::Put, EventKind::Delete, EventKind::Put]);
    assert_eq!(rev3, 3);

    poller.abort();
}

/// End-to-end scenario 6 (gap fill): the poller's own tick must notice a
/// discontinuity sitting between two rows it reads (ids 1, 2, then 4, with
/// 3 missing) and fill it itself — the test never calls `Store::fill`
/// directly, unlike the lower-level `fill_rejects_collision_with_existing_row`
/// / `fill_closes_a_gap_with_a_synthetic_row` store tests.
#[tokio::test]
async fn watch_backfill_skips_gap_rows() {
    let store = support::new_store().await.unwrap();

    store.create("foo", b"1".to_vec(), 0).await.unwrap(); // id 1
    store.create("bar", b"2".to_vec(), 0).await.unwrap(); // id 2

    let hub = support::new_watch_hub(store.clone(), Duration::from_millis(20)).await.unwrap();
    let mut watcher = hub.watch("", 0).await.unwrap(); // backfills foo, bar; last_seen baseline is 2

    let shutdown = tokio::sync::watch::channel(false).1;
    let hub_clone = hub.clone();
    let poller = tokio::spawn(async move { hub_clone.run(shutdown).await });

    // Simulate a writer that claimed id 3 and crashed before completing: a
    // committed insert at an explicit id, then a hard delete, leaves id 3
    // permanently missing (autoincrement sequences never reuse a consumed
    // id) without the table ever holding a row there.
    let pool = store.driver().pool().clone();
    sqlx::query(
        "INSERT INTO kine (id, name, created, deleted, create_revision, prev_revision, lease, value, old_value) \
         VALUES (3, 'doomed', 1, 0, 3, 0, 0, NULL, NULL)",
    )
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query("DELETE FROM kine WHERE id = 3").execute(&pool).await.unwrap();

    store.create("baz", b"3".to_vec(), 0).await.unwrap(); // id 4, with id 3 permanently absent

    let mut seen = Vec::new();
    while let Ok(Some(Ok(event))) = tokio::time::timeout(Duration::from_millis(500), watcher.next()).await {
        seen.push(event.kv.key);
    }
    poller.abort();

    assert!(!seen.iter().any(|k| k.starts_with("gap-")));
    assert!(seen.contains(&"foo".to_string()));
    assert!(seen.contains(&"bar".to_string()));
    assert!(seen.contains(&"baz".to_string()));

    // The poller itself discovered and closed the gap at id 3.
    let filled = sqlx::query("SELECT name FROM kine WHERE id = 3").fetch_one(&pool).await.unwrap();
    assert_eq!(filled.get::<String, _>("name"), "gap-3");
}

#[tokio::test]
async fn watch_rejects_start_rev_below_compact_revision() {
    let store = support::new_store().await.unwrap();
    let compactor = support::new_compactor(store.clone());
    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    let (rev2, _) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap();
    compactor.compact_once(rev2).await.unwrap();

    let hub = support::new_watch_hub(store.clone(), Duration::from_secs(60)).await.unwrap();
    let err = hub.watch("foo", rev1 - 1).await.unwrap_err();
    assert!(matches!(err, Error::Compacted));
}
