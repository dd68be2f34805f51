//! RelayCache Core - Client-side persistent cache for versioned records
//!
//! This crate provides the storage engine behind the relaycache client:
//! - Last-write-wins reconciliation keyed by owner and discriminator
//! - A static registry mapping record categories to SQLite partitions
//! - Schema migration with a readiness channel instead of polling
//! - Master/nested aggregates with indexed cascading delete
//! - Compaction of superseded versions and age-based expiration

pub mod aggregate;
pub mod clock;
pub mod compactor;
pub mod database;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod record;
pub mod registry;
pub mod schema;
pub mod store;
pub mod sweeper;

// Re-exports for convenience
pub use aggregate::{Aggregate, AggregateSummary, DeleteReport, NestedRow};
pub use clock::{Clock, ManualClock, SystemClock};
pub use compactor::CompactionReport;
pub use database::{Database, DatabaseOptions, DbState, DEFAULT_READY_TIMEOUT};
pub use error::{Result, StoreError};
pub use ingest::{IngestReport, MemorySource, RecordSource, SourceQuery};
pub use keys::{logical_key, storage_key};
pub use record::{Lookup, MalformedRecord, Record, StoredValue};
pub use registry::{PartitionSpec, RecordCategory, Semantics, UNCATEGORIZED_PARTITION};
pub use schema::CURRENT_SCHEMA_VERSION;
pub use store::{PutOutcome, RecordStore};
pub use sweeper::{ExpirationSweeper, SweepReport, Ttl, LAST_SWEEP_KEY};
