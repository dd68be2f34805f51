//! SQLite Schema Definitions
//!
//! Each partition is one table in a single cache database. All partitions
//! share the same row layout; the conflict semantics come from the registry,
//! not from the table.

/// Current physical schema version (stored in `PRAGMA user_version`).
/// v2 adds user-list partitions, v3 adds aggregate and draft partitions.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Column names for row queries (in order for row mapping)
pub const ROW_COLUMNS: &str = "key, value, added_at, master_key";

/// SQL to create the metadata table
///
/// Stores cache-level metadata like the creating version and last sweep time.
pub const SCHEMA_CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_metadata (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL
)
"#;

/// SQL to create a partition table.
///
/// `value` holds the record as JSON, NULL for a tombstone. `created_at`
/// mirrors the record's embedded timestamp so conflict checks and
/// compaction ordering do not have to parse JSON.
pub fn create_partition_sql(name: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS "{name}" (
    -- Logical key (versioned) or record id (append-only)
    key TEXT PRIMARY KEY NOT NULL,

    -- Record JSON, NULL = confirmed absent
    value TEXT,

    -- Embedded logical timestamp of the record
    created_at INTEGER,

    -- Wall-clock insertion time in unix millis (expiration only)
    added_at INTEGER NOT NULL,

    -- Logical key of the owning aggregate root
    master_key TEXT
);

-- Cascading delete and nested counts walk this index
CREATE INDEX IF NOT EXISTS "idx_{name}_master_key" ON "{name}"(master_key);

-- Expiration sweeps range over insertion time
CREATE INDEX IF NOT EXISTS "idx_{name}_added_at" ON "{name}"(added_at);
"#
    )
}
