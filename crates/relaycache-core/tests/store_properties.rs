//! Last-write-wins properties of the versioned record store.
//!
//! ```bash
//! cargo test --package relaycache-core --test store_properties
//! ```

mod common;

use common::{content_of, open_store, profile, record};
use pretty_assertions::assert_eq;
use relaycache_core::{Lookup, RecordCategory, StoreError};

// ============================================================================
// Convergence
// ============================================================================

#[tokio::test]
async fn test_lww_converges_in_either_order() {
    for order in [[10, 20], [20, 10]] {
        let env = open_store().await;
        for created_at in order {
            env.store
                .put(profile("alice", created_at, &format!("t{}", created_at)))
                .await
                .unwrap();
        }

        let got = env
            .store
            .get(RecordCategory::Profile, "alice", None)
            .await
            .unwrap();
        assert_eq!(content_of(&got.present().unwrap()), "t20", "order {:?}", order);
    }
}

#[tokio::test]
async fn test_tie_keeps_first_applied_in_either_order() {
    for (first, second) in [("X", "Y"), ("Y", "X")] {
        let env = open_store().await;
        env.store.put(profile("alice", 7, first)).await.unwrap();
        let winner = env.store.put(profile("alice", 7, second)).await.unwrap();
        assert_eq!(content_of(winner.value.as_ref().unwrap()), first);

        let got = env
            .store
            .get(RecordCategory::Profile, "alice", None)
            .await
            .unwrap();
        assert_eq!(content_of(&got.present().unwrap()), first);
    }
}

#[tokio::test]
async fn test_scenario_older_profile_does_not_replace_newer() {
    let env = open_store().await;
    env.store.put(profile("A", 100, "X")).await.unwrap();
    env.store.put(profile("A", 50, "Y")).await.unwrap();

    let got = env
        .store
        .get(RecordCategory::Profile, "A", None)
        .await
        .unwrap();
    assert_eq!(content_of(&got.present().unwrap()), "X");
}

#[tokio::test]
async fn test_added_at_moves_only_on_write() {
    let env = open_store().await;
    let first = env.store.put(profile("alice", 10, "a")).await.unwrap();

    env.clock.advance(5_000);
    let kept = env.store.put(profile("alice", 5, "b")).await.unwrap();
    assert_eq!(kept.added_at, first.added_at);

    env.clock.advance(5_000);
    let replaced = env.store.put(profile("alice", 11, "c")).await.unwrap();
    assert_eq!(replaced.added_at, first.added_at + 10_000);
}

// ============================================================================
// Tri-state lookups
// ============================================================================

#[tokio::test]
async fn test_unknown_absent_present() {
    let env = open_store().await;
    let store = &env.store;

    assert_eq!(
        store.get(RecordCategory::Contacts, "bob", None).await.unwrap(),
        Lookup::Unknown
    );

    store
        .put_tombstone(RecordCategory::Contacts, "bob", None)
        .await
        .unwrap();
    assert_eq!(
        store.get(RecordCategory::Contacts, "bob", None).await.unwrap(),
        Lookup::Absent
    );

    store
        .put(record(RecordCategory::Contacts, "bob", None, 1, "follows"))
        .await
        .unwrap();
    let got = store.get(RecordCategory::Contacts, "bob", None).await.unwrap();
    assert_eq!(content_of(&got.present().unwrap()), "follows");
}

#[tokio::test]
async fn test_empty_discriminator_is_its_own_key() {
    let env = open_store().await;
    let store = &env.store;

    store
        .put(record(RecordCategory::FollowSet, "carol", Some(""), 1, "empty"))
        .await
        .unwrap();
    store
        .put(record(RecordCategory::FollowSet, "carol", Some("friends"), 1, "friends"))
        .await
        .unwrap();

    let empty = store
        .get(RecordCategory::FollowSet, "carol", Some(""))
        .await
        .unwrap();
    assert_eq!(content_of(&empty.present().unwrap()), "empty");

    // The undiscriminated key was never written
    assert!(store
        .get(RecordCategory::FollowSet, "carol", None)
        .await
        .unwrap()
        .is_unknown());

    let counts = store.list_partitions().await.unwrap();
    assert_eq!(counts["follow_sets"], 2);
}

#[tokio::test]
async fn test_get_many_preserves_positions() {
    let env = open_store().await;
    env.store.put(profile("b", 1, "B")).await.unwrap();
    env.store
        .put_tombstone(RecordCategory::Profile, "c", None)
        .await
        .unwrap();

    let results = env
        .store
        .get_many(&["a", "b", "c"], RecordCategory::Profile)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_unknown());
    assert_eq!(content_of(results[1].as_ref().present().unwrap()), "B");
    assert!(results[2].is_absent());
}

#[tokio::test]
async fn test_unreadable_row_reads_as_unknown() {
    let env = open_store().await;
    env.store.put(profile("b", 1, "B")).await.unwrap();

    let conn = rusqlite::Connection::open(env.db_path()).unwrap();
    conn.execute(
        "INSERT INTO profiles (key, value, added_at) VALUES ('a', '{}', 0)",
        [],
    )
    .unwrap();
    drop(conn);

    let single = env
        .store
        .get(RecordCategory::Profile, "a", None)
        .await
        .unwrap();
    assert!(single.is_unknown());

    let batch = env
        .store
        .get_many(&["a", "b"], RecordCategory::Profile)
        .await
        .unwrap();
    assert!(batch[0].is_unknown());
    assert_eq!(content_of(batch[1].as_ref().present().unwrap()), "B");
}

#[tokio::test]
async fn test_get_many_rejects_parameterized_category() {
    let env = open_store().await;
    let err = env
        .store
        .get_many(&["carol"], RecordCategory::FollowSet)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::CategoryMismatch { .. }));
}
