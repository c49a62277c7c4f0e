mod support;

use kine::error::Error;

/// End-to-end scenario 4: Compaction.
#[tokio::test]
async fn compaction_prunes_superseded_rows_and_advances_watermark() {
    let store = support::new_store().await.unwrap();
    let compactor = support::new_compactor(store.clone());

    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap(); // id 1
    let (rev2, _) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap(); // id 2
    let (rev3, _) = store.delete("foo", rev2).await.unwrap(); // id 3
    let (rev4, _) = store.create("foo", b"x".to_vec(), 0).await.unwrap(); // id 4

    let outcome = compactor.compact_once(rev3).await.unwrap();
    assert!(outcome.ran);
    assert_eq!(outcome.compact_revision, rev3);

    // Reading at a now-compacted revision fails.
    let err = store.list("foo", None, 0, rev2, true).await.unwrap_err();
    assert!(matches!(err, Error::Compacted));

    // Reading at/after the new watermark still works and sees the live key.
    let rows = store.list("foo", None, 0, rev4, true).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].value, Some(b"x".to_vec()));

    let (compact_rev, _) = store.get_compact_revision().await.unwrap();
    assert_eq!(compact_rev, rev3);
}

#[tokio::test]
async fn compacting_an_already_compacted_watermark_is_a_no_op() {
    let store = support::new_store().await.unwrap();
    let compactor = support::new_compactor(store.clone());

    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    compactor.compact_once(rev1).await.unwrap();

    let outcome = compactor.compact_once(rev1).await.unwrap();
    assert!(!outcome.ran);
}

#[tokio::test]
async fn compact_revision_is_non_decreasing() {
    let store = support::new_store().await.unwrap();
    let compactor = support::new_compactor(store.clone());

    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    let (rev2, _) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap();

    compactor.compact_once(rev1).await.unwrap();
    let (first, _) = store.get_compact_revision().await.unwrap();

    compactor.compact_once(rev2).await.unwrap();
    let (second, _) = store.get_compact_revision().await.unwrap();

    assert!(second >= first);
}
