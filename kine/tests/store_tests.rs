mod support;

use pretty_assertions::assert_eq;

/// End-to-end scenario 1: Create/Get.
#[tokio::test]
async fn create_then_list_current_returns_the_written_value() {
    let store = support::new_store().await.unwrap();

    let (rev, ok) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    assert!(ok);
    assert_eq!(rev, 1);

    let rows = store.list_current("foo", None, 0, false).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].name, "foo");
    assert_eq!(rows[0].value, Some(b"1".to_vec()));
    assert_eq!(rows[0].id, 1);
    assert!(rows[0].created);
    assert!(!rows[0].deleted);
}

/// End-to-end scenario 2: Update CAS.
#[tokio::test]
async fn update_cas_succeeds_once_and_fails_on_retry_with_stale_rev() {
    let store = support::new_store().await.unwrap();
    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();

    let (rev2, ok2) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap();
    assert!(ok2);
    assert_eq!(rev2, 2);

    let (rev3, ok3) = store.update("foo", b"3".to_vec(), 0, rev1).await.unwrap();
    assert!(!ok3);
    assert_eq!(rev3, 0);
}

/// End-to-end scenario 3: Delete and re-Create.
#[tokio::test]
async fn delete_then_recreate_sets_create_revision_to_new_id() {
    let store = support::new_store().await.unwrap();
    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    let (rev2, _) = store.update("foo", b"2".to_vec(), 0, rev1).await.unwrap();

    let (rev3, ok3) = store.delete("foo", rev2).await.unwrap();
    assert!(ok3);
    assert_eq!(rev3, 3);

    let (rev4, ok4) = store.create("foo", b"x".to_vec(), 0).await.unwrap();
    assert!(ok4);
    assert_eq!(rev4, 4);

    let rows = store.list("foo", None, 0, rev4, true).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].create_revision, 4);
    assert!(rows[0].created);
}

#[tokio::test]
async fn create_is_rejected_while_key_is_live() {
    let store = support::new_store().await.unwrap();
    store.create("foo", b"1".to_vec(), 0).await.unwrap();

    let (rev, ok) = store.create("foo", b"2".to_vec(), 0).await.unwrap();
    assert!(!ok);
    assert_eq!(rev, 0);
}

#[tokio::test]
async fn create_succeeds_again_after_a_tombstone() {
    let store = support::new_store().await.unwrap();
    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();
    store.delete("foo", rev1).await.unwrap();

    let (_, ok) = store.create("foo", b"2".to_vec(), 0).await.unwrap();
    assert!(ok);
}

#[tokio::test]
async fn update_with_expected_prev_rev_zero_is_strict_cas_against_no_prior_row() {
    let store = support::new_store().await.unwrap();

    // No row named "foo" exists at all yet: expectedPrevRev=0 should succeed.
    let (rev, ok) = store.update("foo", b"1".to_vec(), 0, 0).await.unwrap();
    assert!(ok);
    assert_eq!(rev, 1);

    // Now a row exists; expectedPrevRev=0 must fail even though it was once
    // the right CAS token (SPEC_FULL.md §9 resolves this as strict CAS
    // against "no prior row at all", not "create-or-update").
    let (rev2, ok2) = store.update("foo", b"2".to_vec(), 0, 0).await.unwrap();
    assert!(!ok2);
    assert_eq!(rev2, 0);
}

#[tokio::test]
async fn delete_idempotence_one_success_one_cas_miss() {
    let store = support::new_store().await.unwrap();
    let (rev1, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();

    let (_, ok1) = store.delete("foo", rev1).await.unwrap();
    let (_, ok2) = store.delete("foo", rev1).await.unwrap();
    assert!(ok1);
    assert!(!ok2);
}

#[tokio::test]
async fn empty_value_is_stored_non_null_delete_is_null() {
    let store = support::new_store().await.unwrap();
    let (rev, _) = store.create("empty", Vec::new(), 0).await.unwrap();

    let rows = store.list("empty", None, 0, rev, true).await.unwrap();
    assert_eq!(rows[0].value, Some(Vec::new()));

    let (del_rev, _) = store.delete("empty", rev).await.unwrap();
    let rows = store.list("empty", None, 0, del_rev, true).await.unwrap();
    assert_eq!(rows[0].value, None);
}

#[tokio::test]
async fn fill_rejects_collision_with_existing_row() {
    let store = support::new_store().await.unwrap();
    let (rev, _) = store.create("foo", b"1".to_vec(), 0).await.unwrap();

    let err = store.fill(rev).await.unwrap_err();
    assert!(matches!(err, kine::error::Error::ConstraintViolation(_)));
}

#[tokio::test]
async fn fill_closes_a_gap_with_a_synthetic_row() {
    let store = support::new_store().await.unwrap();
    store.create("foo", b"1".to_vec(), 0).await.unwrap(); // id 1
    store.create("bar", b"2".to_vec(), 0).await.unwrap(); // id 2

    store.fill(3).await.unwrap();
    let rows = store.after(0, 0).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].name, "gap-3");
    assert_eq!(rows[2].value, None);
}

/// A trailing `/` turns the prefix into a directory scan (spec.md §4.4 "Key
/// design decisions", §8 boundary behaviors); a bare prefix without `/`
/// only ever matches that exact key.
#[tokio::test]
async fn trailing_slash_prefix_scans_the_whole_subtree() {
    let store = support::new_store().await.unwrap();
    store.create("a/x", b"1".to_vec(), 0).await.unwrap();
    store.create("a/y", b"2".to_vec(), 0).await.unwrap();
    store.create("b/z", b"3".to_vec(), 0).await.unwrap();

    let rows = store.list_current("a/", None, 0, false).await.unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.name.clone()).collect();
    assert_eq!(names, vec!["a/x".to_string(), "a/y".to_string()]);
}

#[tokio::test]
async fn bare_prefix_without_slash_matches_only_the_exact_key() {
    let store = support::new_store().await.unwrap();
    store.create("a", b"1".to_vec(), 0).await.unwrap();
    store.create("ab", b"2".to_vec(), 0).await.unwrap();

    let rows = store.list_current("a", None, 0, false).await.unwrap();
    let names: Vec<_> = rows.iter().map(|r| r.name.clone()).collect();
    assert_eq!(names, vec!["a".to_string()]);
}

#[tokio::test]
async fn count_current_counts_live_keys_in_range() {
    let store = support::new_store().await.unwrap();
    store.create("a/x", b"1".to_vec(), 0).await.unwrap();
    let (create_rev, _) = store.create("a/y", b"2".to_vec(), 0).await.unwrap();
    store.delete("a/y", create_rev).await.unwrap();

    let (_, count) = store.count_current("a/", None).await.unwrap();
    assert_eq!(count, 1);
}
