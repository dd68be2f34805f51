//! Versioned Record Store
//!
//! Point reads and writes with last-write-wins reconciliation per logical
//! key. Each write is one SQLite transaction that reads the resident row and
//! replaces it only when the candidate's embedded `created_at` is strictly
//! greater, so re-delivered or equal-timestamp copies never displace the
//! resident version.

use std::collections::BTreeMap;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::database::{self, Database, DatabaseOptions};
use crate::error::{Result, StoreError};
use crate::keys;
use crate::record::{Lookup, Record, StoredValue};
use crate::registry::{self, PartitionSpec, RecordCategory, Semantics};
use crate::schema::{CURRENT_SCHEMA_VERSION, ROW_COLUMNS};

/// Result of a single write.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    /// The resident row after the write (the candidate or the previous winner)
    pub stored: StoredValue,
    /// Whether the candidate replaced or created the row
    pub written: bool,
}

/// The record store handle. Cheap to clone; clones share the database.
#[derive(Clone)]
pub struct RecordStore {
    db: Database,
}

impl RecordStore {
    /// Wrap an existing database handle.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open the database at `options` and wrap it.
    pub async fn open(options: DatabaseOptions) -> Result<Self> {
        Ok(Self::new(Database::connect(options).await?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn close(&self) -> Result<()> {
        self.db.close().await
    }

    /// See [`Database::force_upgrade`].
    pub async fn force_upgrade(&self) -> Result<u32> {
        self.db.force_upgrade().await
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Store a candidate record and return the winning row.
    pub async fn put(&self, record: Record) -> Result<StoredValue> {
        Ok(self.put_outcome(record).await?.stored)
    }

    /// Store a candidate record and report whether it was written.
    pub async fn put_outcome(&self, record: Record) -> Result<PutOutcome> {
        record.validate()?;
        let spec = registry::partition_for_kind(record.kind);
        let key = keys::storage_key(&record, spec.semantics);
        let record = Arc::new(record);

        self.write(spec.name, move |conn, now| {
            let tx = conn.transaction()?;
            ensure_partition(&tx, spec.name)?;
            let outcome = apply_record(&tx, spec.name, spec.semantics, &key, &record, None, now)?;
            tx.commit()?;
            Ok(outcome)
        })
        .await
    }

    /// Record "confirmed absent" for a logical key, unless something is
    /// already resident. Returns the resident value either way.
    pub async fn put_tombstone(
        &self,
        category: RecordCategory,
        owner: &str,
        discriminator: Option<&str>,
    ) -> Result<Lookup> {
        let spec = versioned_partition(category, "put_tombstone")?;
        let key = category_key(spec, owner, discriminator);

        self.write(spec.name, move |conn, now| {
            let tx = conn.transaction()?;
            ensure_partition(&tx, spec.name)?;
            let inserted = tx.execute(
                &format!(
                    "INSERT OR IGNORE INTO \"{}\" (key, value, created_at, added_at) VALUES (?1, NULL, NULL, ?2)",
                    spec.name
                ),
                params![key, now],
            )?;
            let lookup = match read_row(&tx, spec.name, &key)? {
                Some(row) => row.decode_lenient().into_lookup(),
                None => Lookup::Unknown,
            };
            tx.commit()?;
            if inserted > 0 {
                debug!("Tombstoned {} in {}", key, spec.name);
            }
            Ok(lookup)
        })
        .await
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Read the resident value for a logical key.
    ///
    /// Returns [`Lookup::Unknown`] (and logs a warning) when the partition
    /// does not exist at the current schema version, or when the resident
    /// row cannot be decoded.
    pub async fn get(
        &self,
        category: RecordCategory,
        owner: &str,
        discriminator: Option<&str>,
    ) -> Result<Lookup> {
        let spec = versioned_partition(category, "get")?;
        let key = category_key(spec, owner, discriminator);

        self.db
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, treating as unknown", spec.name);
                    return Ok(Lookup::Unknown);
                }
                let row = match read_row(conn, spec.name, &key)? {
                    Some(row) => row,
                    None => return Ok(Lookup::Unknown),
                };
                match row.decode() {
                    Ok(stored) => Ok(stored.into_lookup()),
                    Err(e) => {
                        warn!("Unreadable row {} in {}: {}", key, spec.name, e);
                        Ok(Lookup::Unknown)
                    }
                }
            })
            .await
    }

    /// Positional batch read. A failed read yields [`Lookup::Unknown`] at its
    /// position without aborting the rest of the batch.
    ///
    /// Owners alone only name rows of replaceable categories; parameterized
    /// categories are rejected.
    pub async fn get_many<S: AsRef<str>>(
        &self,
        owners: &[S],
        category: RecordCategory,
    ) -> Result<Vec<Lookup>> {
        let spec = versioned_partition(category, "get_many")?;
        if spec.semantics == Semantics::Parameterized {
            return Err(StoreError::category_mismatch(
                "get_many",
                category,
                "rows are keyed by owner and discriminator",
            ));
        }
        let keys: Vec<String> = owners
            .iter()
            .map(|o| category_key(spec, o.as_ref(), None))
            .collect();

        self.db
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, treating as unknown", spec.name);
                    return Ok(vec![Lookup::Unknown; keys.len()]);
                }
                let results = keys
                    .iter()
                    .map(|key| {
                        let read = read_row(conn, spec.name, key)
                            .and_then(|row| row.map(|r| r.decode()).transpose());
                        match read {
                            Ok(row) => Lookup::from(row),
                            Err(e) => {
                                warn!("Read of {} in {} failed: {}", key, spec.name, e);
                                Lookup::Unknown
                            }
                        }
                    })
                    .collect();
                Ok(results)
            })
            .await
    }

    /// Read an append-only record by id.
    pub async fn get_by_id(&self, kind: u32, id: &str) -> Result<Lookup> {
        let spec = registry::partition_for_kind(kind);
        if spec.semantics.is_versioned() {
            if let Some(category) = spec.category {
                return Err(StoreError::category_mismatch(
                    "get_by_id",
                    category,
                    "rows are keyed by logical key, not id",
                ));
            }
        }
        let id = id.to_string();

        self.db
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, treating as unknown", spec.name);
                    return Ok(Lookup::Unknown);
                }
                Ok(Lookup::from(
                    read_row(conn, spec.name, &id)?
                        .map(|r| r.decode())
                        .transpose()?,
                ))
            })
            .await
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Row counts for every partition that exists on disk.
    pub async fn list_partitions(&self) -> Result<BTreeMap<String, usize>> {
        self.db
            .call(|conn| {
                let tables = database::existing_tables(conn)?;
                let mut counts = BTreeMap::new();
                for spec in registry::partitions() {
                    if tables.contains(spec.name) {
                        counts.insert(spec.name.to_string(), count_rows(conn, spec.name)?);
                    }
                }
                Ok(counts)
            })
            .await
    }

    /// Delete every row of one partition. Returns the number removed.
    pub async fn clear_partition(&self, name: &str) -> Result<usize> {
        let spec = registry::partition_by_name(name)
            .ok_or_else(|| StoreError::UnknownPartition(name.to_string()))?;

        self.db
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, nothing to clear", spec.name);
                    return Ok(0);
                }
                let removed = conn.execute(&format!("DELETE FROM \"{}\"", spec.name), [])?;
                debug!("Cleared {} rows from {}", removed, spec.name);
                Ok(removed)
            })
            .await
    }

    /// Delete every row of every partition in one transaction.
    pub async fn clear_all(&self) -> Result<usize> {
        self.db
            .call(|conn| {
                let tx = conn.transaction()?;
                let tables = database::existing_tables(&tx)?;
                let mut removed = 0;
                for spec in registry::partitions() {
                    if tables.contains(spec.name) {
                        removed += tx.execute(&format!("DELETE FROM \"{}\"", spec.name), [])?;
                    }
                }
                tx.commit()?;
                debug!("Cleared {} rows from all partitions", removed);
                Ok(removed)
            })
            .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run a write, forcing schema upgrades while it fails on a missing
    /// partition (when enabled).
    pub(crate) async fn write<F, R>(&self, partition: &'static str, f: F) -> Result<R>
    where
        F: Fn(&mut Connection, i64) -> Result<R> + Send + Sync + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let mut upgrades = 0;
        loop {
            let attempt = Arc::clone(&f);
            let clock = Arc::clone(self.db.clock());
            let result = self
                .db
                .call(move |conn| attempt(conn, clock.now_millis()))
                .await;

            match result {
                Err(StoreError::PartitionMissing(name))
                    if self.db.options().auto_upgrade && upgrades < CURRENT_SCHEMA_VERSION =>
                {
                    upgrades += 1;
                    // A concurrent writer may already have upgraded
                    if self.db.existing_partitions().await?.contains(&name) {
                        continue;
                    }
                    warn!(
                        "Write to {} hit missing partition {}, forcing schema upgrade",
                        partition, name
                    );
                    self.db.force_upgrade().await?;
                }
                other => return other,
            }
        }
    }
}

/// Partition for a category that must use versioned semantics.
pub(crate) fn versioned_partition(
    category: RecordCategory,
    operation: &'static str,
) -> Result<&'static PartitionSpec> {
    let spec = category.partition();
    if !spec.semantics.is_versioned() {
        return Err(StoreError::category_mismatch(
            operation,
            category,
            "category is append-only",
        ));
    }
    Ok(spec)
}

/// Logical key of `owner`/`discriminator` within a versioned partition.
pub(crate) fn category_key(
    spec: &PartitionSpec,
    owner: &str,
    discriminator: Option<&str>,
) -> String {
    match spec.semantics {
        Semantics::Parameterized => keys::logical_key(owner, discriminator),
        _ => keys::logical_key(owner, None),
    }
}

pub(crate) fn ensure_partition(conn: &Connection, name: &str) -> Result<()> {
    if database::table_exists(conn, name)? {
        Ok(())
    } else {
        Err(StoreError::PartitionMissing(name.to_string()))
    }
}

/// Apply a candidate to its partition inside the caller's transaction.
///
/// `master_key`, when given, is attached to the resident row even if the
/// candidate loses, so aggregate links stay accurate.
pub(crate) fn apply_record(
    conn: &Connection,
    table: &str,
    semantics: Semantics,
    key: &str,
    record: &Record,
    master_key: Option<&str>,
    now: i64,
) -> Result<PutOutcome> {
    let resident = read_row(conn, table, key)?.map(RawRow::decode_lenient);

    if let Some(mut resident) = resident {
        let keeps = match (&resident.value, semantics) {
            // Append-only rows are immutable once present
            (Some(_), Semantics::AppendOnly) => true,
            (Some(current), _) => current.created_at >= record.created_at,
            // A tombstone never beats real data
            (None, _) => false,
        };

        if keeps {
            if let Some(master) = master_key {
                if resident.master_key.as_deref() != Some(master) {
                    set_master_key(conn, table, key, master)?;
                    resident.master_key = Some(master.to_string());
                }
            }
            debug!("Kept resident {} in {}", key, table);
            return Ok(PutOutcome {
                stored: resident,
                written: false,
            });
        }

        let master = master_key
            .map(str::to_string)
            .or(resident.master_key.take());
        write_row(conn, table, key, Some(record), now, master.as_deref())?;
        return Ok(PutOutcome {
            stored: StoredValue {
                key: key.to_string(),
                value: Some(record.clone()),
                added_at: now,
                master_key: master,
            },
            written: true,
        });
    }

    write_row(conn, table, key, Some(record), now, master_key)?;
    Ok(PutOutcome {
        stored: StoredValue {
            key: key.to_string(),
            value: Some(record.clone()),
            added_at: now,
            master_key: master_key.map(str::to_string),
        },
        written: true,
    })
}

// =============================================================================
// Row access
// =============================================================================

/// A row as stored, before the value JSON is parsed.
#[derive(Debug, Clone)]
pub(crate) struct RawRow {
    pub key: String,
    pub value: Option<String>,
    pub added_at: i64,
    pub master_key: Option<String>,
}

impl RawRow {
    /// Map a row selected with [`ROW_COLUMNS`].
    pub(crate) fn from_row(row: &rusqlite::Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            added_at: row.get(2)?,
            master_key: row.get(3)?,
        })
    }

    /// Parse the stored value.
    pub(crate) fn decode(self) -> Result<StoredValue> {
        let value = match self.value.as_deref() {
            Some(json) => Some(parse_value(json)?),
            None => None,
        };
        Ok(StoredValue {
            key: self.key,
            value,
            added_at: self.added_at,
            master_key: self.master_key,
        })
    }

    /// Parse the stored value, treating an unparseable one like a tombstone.
    pub(crate) fn decode_lenient(self) -> StoredValue {
        let value = self.value.as_deref().and_then(|json| match parse_value(json) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Resident row {} is unreadable, it will be overwritten: {}", self.key, e);
                None
            }
        });
        StoredValue {
            key: self.key,
            value,
            added_at: self.added_at,
            master_key: self.master_key,
        }
    }
}

pub(crate) fn parse_value(json: &str) -> Result<Record> {
    let value: Value = serde_json::from_str(json)?;
    Ok(Record::from_value(&value)?)
}

pub(crate) fn read_row(conn: &Connection, table: &str, key: &str) -> Result<Option<RawRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM \"{}\" WHERE key = ?1", ROW_COLUMNS, table),
            [key],
            RawRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn write_row(
    conn: &Connection,
    table: &str,
    key: &str,
    value: Option<&Record>,
    added_at: i64,
    master_key: Option<&str>,
) -> Result<()> {
    let json = value.map(serde_json::to_string).transpose()?;
    conn.execute(
        &format!(
            r#"
            INSERT OR REPLACE INTO "{}" (key, value, created_at, added_at, master_key)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            table
        ),
        params![key, json, value.map(|r| r.created_at), added_at, master_key],
    )?;
    Ok(())
}

pub(crate) fn set_master_key(conn: &Connection, table: &str, key: &str, master: &str) -> Result<()> {
    conn.execute(
        &format!("UPDATE \"{}\" SET master_key = ?1 WHERE key = ?2", table),
        params![master, key],
    )?;
    Ok(())
}

pub(crate) fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}
