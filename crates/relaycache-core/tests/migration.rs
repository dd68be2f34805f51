//! Schema migration and lifecycle tests.
//!
//! ```bash
//! cargo test --package relaycache-core --test migration
//! ```

mod common;

use std::collections::BTreeSet;

use common::{open_store_at_version, options_at, profile, record};
use pretty_assertions::assert_eq;
use relaycache_core::{
    registry, DbState, RecordCategory, RecordStore, StoreError, CURRENT_SCHEMA_VERSION,
};

async fn partition_names(store: &RecordStore) -> BTreeSet<String> {
    store
        .database()
        .existing_partitions()
        .await
        .unwrap()
        .into_iter()
        .collect()
}

#[tokio::test]
async fn test_open_at_each_version_creates_declared_partitions() {
    for version in 1..=CURRENT_SCHEMA_VERSION {
        let env = open_store_at_version(version).await;
        let expected: BTreeSet<String> = registry::partitions_at(version)
            .map(|p| p.name.to_string())
            .collect();
        assert_eq!(partition_names(&env.store).await, expected);
    }
}

#[tokio::test]
async fn test_reopening_is_idempotent_and_keeps_rows() {
    let env = open_store_at_version(2).await;
    env.store.put(profile("alice", 1, "A")).await.unwrap();
    let before = partition_names(&env.store).await;
    env.store.close().await.unwrap();

    // Reopen at the same version twice, then upgrade
    for version in [2, 2, CURRENT_SCHEMA_VERSION] {
        let store = RecordStore::open(
            options_at(env.dir.path(), env.clock.clone()).with_schema_version(version),
        )
        .await
        .unwrap();
        let names = partition_names(&store).await;
        assert!(names.is_superset(&before));
        assert_eq!(store.list_partitions().await.unwrap()["profiles"], 1);
        store.close().await.unwrap();
    }
}

#[tokio::test]
async fn test_unmigrated_partition_reads_unknown() {
    let env = open_store_at_version(1).await;

    let got = env
        .store
        .get(RecordCategory::BadgeDefinition, "alice", Some("gold"))
        .await
        .unwrap();
    assert!(got.is_unknown());

    let many = env
        .store
        .get_many(&["a", "b"], RecordCategory::PinList)
        .await
        .unwrap();
    assert!(many.iter().all(|l| l.is_unknown()));
}

#[tokio::test]
async fn test_write_to_unmigrated_partition_upgrades_until_present() {
    let env = open_store_at_version(1).await;

    // Declared at v3: needs two forced bumps
    env.store
        .put(record(RecordCategory::BadgeDefinition, "alice", Some("gold"), 1, "badge"))
        .await
        .unwrap();

    let got = env
        .store
        .get(RecordCategory::BadgeDefinition, "alice", Some("gold"))
        .await
        .unwrap();
    assert!(got.present().is_some());
    assert_eq!(env.store.database().schema_version().await.unwrap(), 3);
}

#[tokio::test]
async fn test_forced_upgrade_preserves_rows() {
    let env = open_store_at_version(1).await;
    env.store.put(profile("alice", 1, "A")).await.unwrap();

    let version = env.store.force_upgrade().await.unwrap();
    assert_eq!(version, 2);
    assert_eq!(env.store.database().state(), DbState::Ready);
    assert!(partition_names(&env.store).await.contains("emoji_lists"));

    let got = env
        .store
        .get(RecordCategory::Profile, "alice", None)
        .await
        .unwrap();
    assert!(got.present().is_some());
}

#[tokio::test]
async fn test_closed_store_is_retryably_unavailable() {
    let env = open_store_at_version(CURRENT_SCHEMA_VERSION).await;
    env.store.close().await.unwrap();

    let err = env
        .store
        .get(RecordCategory::Profile, "alice", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Unavailable(_)));
    assert!(err.is_retryable());

    // Reopening the same handle restores service
    env.store.database().open().await.unwrap();
    assert!(env
        .store
        .get(RecordCategory::Profile, "alice", None)
        .await
        .unwrap()
        .is_unknown());
}

#[tokio::test]
async fn test_newer_schema_is_rejected() {
    let env = open_store_at_version(CURRENT_SCHEMA_VERSION).await;
    env.store.close().await.unwrap();

    let err = RecordStore::open(options_at(env.dir.path(), env.clock.clone()).with_schema_version(1))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, StoreError::SchemaTooNew { .. }));
}
