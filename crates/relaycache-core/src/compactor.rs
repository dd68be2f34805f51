//! Compaction of versioned partitions.
//!
//! Rows are grouped by the logical key recomputed from their own content
//! rather than the key they are stored under, so duplicates left behind by
//! older layouts collapse to a single winner.

use std::collections::BTreeMap;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::database;
use crate::error::{Result, StoreError};
use crate::keys;
use crate::registry::{self, PartitionSpec, RecordCategory};
use crate::schema::ROW_COLUMNS;
use crate::store::{parse_value, RawRow, RecordStore};

/// Outcome of compacting one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Rows read from the partition
    pub scanned: usize,
    /// Rows left in place (one per logical key, plus foreign nested rows)
    pub kept: usize,
    /// Superseded rows removed
    pub deleted: usize,
    /// Unreadable rows left untouched
    pub skipped: usize,
    /// Kept rows moved from a stale key to their logical key
    pub rekeyed: usize,
}

/// A row competing for its logical key.
#[derive(Debug)]
struct Candidate {
    row_key: String,
    /// `None` for a tombstone, which loses to any real record
    created_at: Option<i64>,
    added_at: i64,
}

impl RecordStore {
    /// Collapse each logical key of a versioned category to its newest row.
    ///
    /// Ties on `created_at` keep the row added last. Fails with
    /// [`StoreError::CategoryMismatch`] for append-only categories.
    pub async fn compact(&self, category: RecordCategory) -> Result<CompactionReport> {
        let spec = category.partition();
        if !spec.semantics.is_versioned() {
            return Err(StoreError::category_mismatch(
                "compact",
                category,
                "only versioned categories have superseded rows",
            ));
        }

        self.database()
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, nothing to compact", spec.name);
                    return Ok(CompactionReport::default());
                }
                let tx = conn.transaction()?;
                let report = compact_partition(&tx, spec)?;
                tx.commit()?;
                info!(
                    "Compacted {}: scanned {}, kept {}, deleted {}, skipped {}",
                    spec.name, report.scanned, report.kept, report.deleted, report.skipped
                );
                Ok(report)
            })
            .await
    }
}

fn compact_partition(conn: &Connection, spec: &PartitionSpec) -> Result<CompactionReport> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM \"{}\" ORDER BY key",
        ROW_COLUMNS, spec.name
    ))?;
    let rows = stmt
        .query_map([], RawRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut report = CompactionReport {
        scanned: rows.len(),
        ..Default::default()
    };
    let mut groups: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();

    for row in rows {
        let Some(json) = row.value.as_deref() else {
            groups.entry(row.key.clone()).or_default().push(Candidate {
                row_key: row.key,
                created_at: None,
                added_at: row.added_at,
            });
            continue;
        };

        match parse_value(json) {
            Err(e) => {
                warn!("Skipping unreadable row {} in {}: {}", row.key, spec.name, e);
                report.skipped += 1;
            }
            // Nested append-only rows of an aggregate share the partition
            Ok(record) if registry::partition_for_kind(record.kind).name != spec.name => {
                report.kept += 1;
            }
            Ok(record) => {
                let key = keys::storage_key(&record, spec.semantics);
                groups.entry(key).or_default().push(Candidate {
                    row_key: row.key,
                    created_at: Some(record.created_at),
                    added_at: row.added_at,
                });
            }
        }
    }

    for (logical, mut candidates) in groups {
        candidates.sort_by_key(|c| (c.created_at, c.added_at, c.row_key == logical));
        let Some(winner) = candidates.pop() else {
            continue;
        };

        for loser in &candidates {
            report.deleted += conn.execute(
                &format!("DELETE FROM \"{}\" WHERE key = ?1", spec.name),
                [&loser.row_key],
            )?;
        }
        report.kept += 1;

        if winner.row_key != logical {
            if database_row_exists(conn, spec.name, &logical)? {
                warn!(
                    "Cannot move {} to {} in {}: key is occupied by an unreadable row",
                    winner.row_key, logical, spec.name
                );
                continue;
            }
            conn.execute(
                &format!("UPDATE \"{}\" SET key = ?1 WHERE key = ?2", spec.name),
                params![logical, winner.row_key],
            )?;
            report.rekeyed += 1;
            debug!("Re-keyed {} to {} in {}", winner.row_key, logical, spec.name);
        }
    }

    if report.kept + report.deleted + report.skipped != report.scanned {
        return Err(StoreError::Inconsistent(format!(
            "compaction of {} scanned {} rows but kept {}, deleted {}, skipped {}",
            spec.name, report.scanned, report.kept, report.deleted, report.skipped
        )));
    }

    Ok(report)
}

fn database_row_exists(conn: &Connection, table: &str, key: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM \"{}\" WHERE key = ?1)", table),
        [key],
        |row| row.get(0),
    )?;
    Ok(exists != 0)
}
