//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use relaycache_core::{DatabaseOptions, ManualClock, Record, RecordCategory, RecordStore};
use serde_json::json;
use tempfile::TempDir;

/// A store on a fresh temp database with a manual clock.
pub struct TestStore {
    pub dir: TempDir,
    pub store: RecordStore,
    pub clock: Arc<ManualClock>,
}

impl TestStore {
    pub fn db_path(&self) -> std::path::PathBuf {
        self.dir.path().join("cache.db")
    }

    pub fn options(&self) -> DatabaseOptions {
        options_at(self.dir.path(), self.clock.clone())
    }
}

pub fn options_at(dir: &std::path::Path, clock: Arc<ManualClock>) -> DatabaseOptions {
    DatabaseOptions::new(dir.join("cache.db"))
        .with_clock(clock)
        .with_ready_timeout(Duration::from_secs(2))
}

pub async fn open_store() -> TestStore {
    open_store_at_version(relaycache_core::CURRENT_SCHEMA_VERSION).await
}

pub async fn open_store_at_version(version: u32) -> TestStore {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let clock = Arc::new(ManualClock::new(1_000_000));
    let store = RecordStore::open(options_at(dir.path(), clock.clone()).with_schema_version(version))
        .await
        .expect("Failed to open store");
    TestStore { dir, store, clock }
}

/// Build a record of `category` with a payload marker.
pub fn record(
    category: RecordCategory,
    owner: &str,
    discriminator: Option<&str>,
    created_at: i64,
    content: &str,
) -> Record {
    Record {
        id: format!("{}-{}-{}-{}", category, owner, created_at, content),
        owner: owner.to_string(),
        kind: category.kind(),
        created_at,
        discriminator: discriminator.map(str::to_string),
        content: json!({ "content": content }),
    }
}

pub fn profile(owner: &str, created_at: i64, content: &str) -> Record {
    record(RecordCategory::Profile, owner, None, created_at, content)
}

pub fn note(id: &str, owner: &str) -> Record {
    Record {
        id: id.to_string(),
        ..record(RecordCategory::Note, owner, None, 1, id)
    }
}

/// Content marker of a present record.
pub fn content_of(record: &Record) -> &str {
    record.content["content"].as_str().unwrap_or_default()
}
