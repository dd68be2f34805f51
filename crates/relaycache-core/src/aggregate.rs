//! Aggregate linking
//!
//! An aggregate is a master record plus the nested records that belong to it.
//! Every nested row carries a link to its master in the `master_key` column:
//! the master's partition and logical key (`community_definitions/bob:d1`).
//! The column is indexed in every partition, so cascading lookups and deletes
//! are index scans rather than full partition walks.

use std::sync::Arc;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::database;
use crate::error::Result;
use crate::keys;
use crate::record::{MalformedRecord, Record, StoredValue};
use crate::registry::{self, RecordCategory, Semantics};
use crate::schema::ROW_COLUMNS;
use crate::store::{
    apply_record, category_key, ensure_partition, read_row, versioned_partition, RawRow,
    RecordStore,
};

/// A nested row and the partition it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedRow {
    pub partition: String,
    pub row: StoredValue,
}

/// A master row with every row that references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub master: StoredValue,
    pub nested: Vec<NestedRow>,
}

/// A root row annotated with how many rows reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub key: String,
    pub value: Record,
    pub nested_count: usize,
}

/// Result of a cascading delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted: usize,
}

impl RecordStore {
    /// Store a master record and its nested records in one transaction.
    ///
    /// Nested records of a versioned category go through last-write-wins in
    /// their own partition; the link to the master is recorded even when
    /// their content loses. Other nested records are stored by id in the
    /// master's partition.
    pub async fn put_aggregate(&self, master: Record, nested: Vec<Record>) -> Result<StoredValue> {
        let category = master.category().ok_or(MalformedRecord::InvalidField {
            field: "kind",
            reason: "unregistered kind cannot be an aggregate root",
        })?;
        let spec = versioned_partition(category, "put_aggregate")?;
        master.validate()?;
        for child in &nested {
            child.validate()?;
        }

        let master_key = keys::storage_key(&master, spec.semantics);
        let link = keys::master_link(spec.name, &master_key);
        let master = Arc::new(master);
        let nested = Arc::new(nested);

        self.write(spec.name, move |conn, now| {
            let tx = conn.transaction()?;
            ensure_partition(&tx, spec.name)?;
            let outcome = apply_record(
                &tx,
                spec.name,
                spec.semantics,
                &master_key,
                &master,
                None,
                now,
            )?;

            for child in nested.iter() {
                let child_spec = registry::partition_for_kind(child.kind);
                if child_spec.semantics.is_versioned() {
                    ensure_partition(&tx, child_spec.name)?;
                    let key = keys::storage_key(child, child_spec.semantics);
                    apply_record(
                        &tx,
                        child_spec.name,
                        child_spec.semantics,
                        &key,
                        child,
                        Some(&link),
                        now,
                    )?;
                } else {
                    apply_record(
                        &tx,
                        spec.name,
                        Semantics::AppendOnly,
                        &child.id,
                        child,
                        Some(&link),
                        now,
                    )?;
                }
            }

            tx.commit()?;
            debug!(
                "Stored aggregate {} in {} with {} nested records",
                master_key,
                spec.name,
                nested.len()
            );
            Ok(outcome.stored)
        })
        .await
    }

    /// Cascading lookup: the master row plus every row referencing it.
    ///
    /// Returns `None` when the master is not resident, is a tombstone, or
    /// cannot be decoded.
    pub async fn get_aggregate(
        &self,
        category: RecordCategory,
        owner: &str,
        discriminator: Option<&str>,
    ) -> Result<Option<Aggregate>> {
        let spec = versioned_partition(category, "get_aggregate")?;
        let master_key = category_key(spec, owner, discriminator);
        let link = keys::master_link(spec.name, &master_key);

        self.database()
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, treating as unknown", spec.name);
                    return Ok(None);
                }
                let master = match read_row(conn, spec.name, &master_key)?.map(RawRow::decode) {
                    Some(Ok(row)) => row,
                    Some(Err(e)) => {
                        warn!("Unreadable master {} in {}: {}", master_key, spec.name, e);
                        return Ok(None);
                    }
                    None => return Ok(None),
                };
                if master.is_tombstone() {
                    return Ok(None);
                }

                let mut nested = Vec::new();
                for name in linked_tables(conn)? {
                    for raw in rows_referencing(conn, name, &link)? {
                        match raw.decode() {
                            Ok(row) => nested.push(NestedRow {
                                partition: name.to_string(),
                                row,
                            }),
                            Err(e) => warn!("Skipping unreadable nested row in {}: {}", name, e),
                        }
                    }
                }

                Ok(Some(Aggregate { master, nested }))
            })
            .await
    }

    /// Every root row of a category with its nested-row count.
    pub async fn get_aggregate_summaries(
        &self,
        category: RecordCategory,
    ) -> Result<Vec<AggregateSummary>> {
        let spec = versioned_partition(category, "get_aggregate_summaries")?;

        self.database()
            .call(move |conn| {
                if !database::table_exists(conn, spec.name)? {
                    warn!("Partition {} not yet created, no aggregates", spec.name);
                    return Ok(Vec::new());
                }

                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM \"{}\" WHERE master_key IS NULL ORDER BY key",
                    ROW_COLUMNS, spec.name
                ))?;
                let roots = stmt
                    .query_map([], RawRow::from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let tables = linked_tables(conn)?;
                let mut summaries = Vec::with_capacity(roots.len());
                for raw in roots {
                    let key = raw.key.clone();
                    let value = match raw.decode() {
                        Ok(StoredValue {
                            value: Some(value), ..
                        }) => value,
                        Ok(_) => continue,
                        Err(e) => {
                            warn!("Skipping unreadable root {} in {}: {}", key, spec.name, e);
                            continue;
                        }
                    };

                    let mut nested_count = 0;
                    let link = keys::master_link(spec.name, &key);
                    for name in &tables {
                        nested_count += count_referencing(conn, name, &link)?;
                    }
                    summaries.push(AggregateSummary {
                        key,
                        value,
                        nested_count,
                    });
                }
                Ok(summaries)
            })
            .await
    }

    /// Delete a master row and every row referencing it in one transaction.
    ///
    /// Deleting an aggregate that does not exist reports zero rows.
    pub async fn delete_aggregate(
        &self,
        category: RecordCategory,
        owner: &str,
        discriminator: Option<&str>,
    ) -> Result<DeleteReport> {
        let spec = versioned_partition(category, "delete_aggregate")?;
        let master_key = category_key(spec, owner, discriminator);
        let link = keys::master_link(spec.name, &master_key);

        self.database()
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut deleted = 0;
                for name in linked_tables(&tx)? {
                    deleted += tx.execute(
                        &format!("DELETE FROM \"{}\" WHERE master_key = ?1", name),
                        [&link],
                    )?;
                }
                if database::table_exists(&tx, spec.name)? {
                    deleted += tx.execute(
                        &format!("DELETE FROM \"{}\" WHERE key = ?1", spec.name),
                        [&master_key],
                    )?;
                }
                tx.commit()?;
                debug!("Deleted aggregate {} ({} rows)", master_key, deleted);
                Ok(DeleteReport { deleted })
            })
            .await
    }
}

/// Registry partitions present on disk, in declaration order.
fn linked_tables(conn: &Connection) -> Result<Vec<&'static str>> {
    let tables = database::existing_tables(conn)?;
    Ok(registry::partitions()
        .iter()
        .map(|p| p.name)
        .filter(|name| tables.contains(*name))
        .collect())
}

fn rows_referencing(conn: &Connection, table: &str, link: &str) -> Result<Vec<RawRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM \"{}\" WHERE master_key = ?1 ORDER BY key",
        ROW_COLUMNS, table
    ))?;
    let rows = stmt
        .query_map([link], RawRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn count_referencing(conn: &Connection, table: &str, link: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM \"{}\" WHERE master_key = ?1", table),
        [link],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseOptions;
    use crate::error::StoreError;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, owner: &str, kind: u32, created_at: i64, d: Option<&str>) -> Record {
        Record {
            id: id.to_string(),
            owner: owner.to_string(),
            kind,
            created_at,
            discriminator: d.map(str::to_string),
            content: json!({ "id": id }),
        }
    }

    fn community(owner: &str, d: &str, created_at: i64) -> Record {
        record(
            &format!("{}-{}-{}", owner, d, created_at),
            owner,
            RecordCategory::CommunityDefinition.kind(),
            created_at,
            Some(d),
        )
    }

    fn note(id: &str, owner: &str) -> Record {
        record(id, owner, RecordCategory::Note.kind(), 1, None)
    }

    async fn open_store(dir: &TempDir) -> RecordStore {
        RecordStore::open(DatabaseOptions::new(dir.path().join("cache.db")))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_and_get_aggregate() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let stored = store
            .put_aggregate(community("bob", "d1", 10), vec![note("n1", "x"), note("n2", "y")])
            .await
            .unwrap();
        assert_eq!(stored.key, "bob:d1");

        let aggregate = store
            .get_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.master.key, "bob:d1");
        let ids: Vec<_> = aggregate.nested.iter().map(|n| n.row.key.as_str()).collect();
        assert_eq!(ids, vec!["n1", "n2"]);
        assert!(aggregate
            .nested
            .iter()
            .all(|n| n.partition == "community_definitions"
                && n.row.master_key.as_deref() == Some("community_definitions/bob:d1")));
    }

    #[tokio::test]
    async fn test_versioned_nested_link_survives_losing_content() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        // A newer standalone profile is already resident
        let mut newer = record("p2", "carol", 0, 50, None);
        newer.content = json!({ "name": "newer" });
        store.put(newer).await.unwrap();

        let older = record("p1", "carol", 0, 10, None);
        store
            .put_aggregate(community("bob", "d1", 1), vec![older])
            .await
            .unwrap();

        let aggregate = store
            .get_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(aggregate.nested.len(), 1);
        let linked = &aggregate.nested[0];
        assert_eq!(linked.partition, "profiles");
        assert_eq!(linked.row.value.as_ref().unwrap().content["name"], "newer");
        assert_eq!(
            linked.row.master_key.as_deref(),
            Some("community_definitions/bob:d1")
        );
    }

    #[tokio::test]
    async fn test_summaries_count_nested_across_partitions() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_aggregate(
                community("bob", "d1", 1),
                vec![note("n1", "x"), record("p1", "carol", 0, 1, None)],
            )
            .await
            .unwrap();
        store
            .put_aggregate(community("bob", "d2", 1), vec![])
            .await
            .unwrap();

        let summaries = store
            .get_aggregate_summaries(RecordCategory::CommunityDefinition)
            .await
            .unwrap();
        let counts: Vec<_> = summaries
            .iter()
            .map(|s| (s.key.as_str(), s.nested_count))
            .collect();
        assert_eq!(counts, vec![("bob:d1", 2), ("bob:d2", 0)]);
    }

    #[tokio::test]
    async fn test_delete_aggregate_cascades_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_aggregate(
                community("bob", "d1", 1),
                vec![note("n1", "x"), note("n2", "y"), record("p1", "carol", 0, 1, None)],
            )
            .await
            .unwrap();
        store
            .put_aggregate(community("bob", "d2", 1), vec![note("n3", "z")])
            .await
            .unwrap();

        let report = store
            .delete_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap();
        assert_eq!(report.deleted, 4);

        assert!(store
            .get_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get(RecordCategory::Profile, "carol", None)
            .await
            .unwrap()
            .is_unknown());

        // The sibling aggregate is untouched
        let summaries = store
            .get_aggregate_summaries(RecordCategory::CommunityDefinition)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].nested_count, 1);

        let again = store
            .delete_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap();
        assert_eq!(again, DeleteReport { deleted: 0 });
    }

    #[tokio::test]
    async fn test_append_only_master_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let err = store
            .put_aggregate(note("n1", "x"), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::CategoryMismatch { .. }));

        let err = store
            .put_aggregate(record("m", "x", 4242, 1, None), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_tombstoned_master_has_no_aggregate() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_tombstone(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap();
        assert!(store
            .get_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_aggregate_summaries(RecordCategory::CommunityDefinition)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_same_key_aggregates_in_different_categories_stay_apart() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let follow = record("f1", "bob", RecordCategory::FollowSet.kind(), 1, Some("d1"));
        store
            .put_aggregate(follow, vec![note("n-follow", "x")])
            .await
            .unwrap();
        store
            .put_aggregate(community("bob", "d1", 1), vec![note("n-comm", "y")])
            .await
            .unwrap();

        let summaries = store
            .get_aggregate_summaries(RecordCategory::FollowSet)
            .await
            .unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].nested_count, 1);

        let report = store
            .delete_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap();
        assert_eq!(report.deleted, 2);

        let aggregate = store
            .get_aggregate(RecordCategory::FollowSet, "bob", Some("d1"))
            .await
            .unwrap()
            .unwrap();
        let ids: Vec<_> = aggregate.nested.iter().map(|n| n.row.key.as_str()).collect();
        assert_eq!(ids, vec!["n-follow"]);
        assert_eq!(
            aggregate.nested[0].row.master_key.as_deref(),
            Some("follow_sets/bob:d1")
        );
    }

    #[tokio::test]
    async fn test_unreadable_master_has_no_aggregate() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store
            .put_aggregate(community("bob", "d1", 1), vec![note("n1", "x")])
            .await
            .unwrap();
        store
            .database()
            .call(|conn| {
                conn.execute(
                    "UPDATE \"community_definitions\" SET value = '{}' WHERE key = 'bob:d1'",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        assert!(store
            .get_aggregate(RecordCategory::CommunityDefinition, "bob", Some("d1"))
            .await
            .unwrap()
            .is_none());
    }
}
