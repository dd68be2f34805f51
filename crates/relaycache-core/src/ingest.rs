//! Ingest of raw candidates from the network layer.
//!
//! Candidates arrive as untyped JSON. Malformed ones are counted and dropped
//! so a corrupt relay response never makes the store unserviceable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::record::Record;
use crate::store::RecordStore;

/// Filter passed to a [`RecordSource`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceQuery {
    /// Only these kinds (empty = all)
    #[serde(default)]
    pub kinds: Vec<u32>,
    /// Only these owners (empty = all)
    #[serde(default)]
    pub owners: Vec<String>,
    /// Only candidates with `created_at >= since`
    #[serde(default)]
    pub since: Option<i64>,
    /// Stop after this many candidates
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SourceQuery {
    /// Whether a raw candidate passes this filter. Fields that are missing
    /// or mistyped pass; validation happens at ingest.
    pub fn matches(&self, value: &Value) -> bool {
        let kind_ok = self.kinds.is_empty()
            || value
                .get("kind")
                .and_then(Value::as_u64)
                .map_or(true, |k| self.kinds.iter().any(|&want| u64::from(want) == k));
        let owner_ok = self.owners.is_empty()
            || value
                .get("owner")
                .or_else(|| value.get("pubkey"))
                .and_then(Value::as_str)
                .map_or(true, |o| self.owners.iter().any(|want| want == o));
        let since_ok = match (self.since, value.get("created_at").and_then(Value::as_i64)) {
            (Some(since), Some(created_at)) => created_at >= since,
            _ => true,
        };
        kind_ok && owner_ok && since_ok
    }
}

/// Where raw candidates come from (a relay pool, a file, a test fixture).
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch candidates matching `query`.
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Value>>;
}

/// A source backed by a fixed list of candidates.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    values: Vec<Value>,
}

impl MemorySource {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

#[async_trait]
impl RecordSource for MemorySource {
    async fn fetch(&self, query: &SourceQuery) -> Result<Vec<Value>> {
        let matching = self.values.iter().filter(|v| query.matches(v)).cloned();
        Ok(match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        })
    }
}

/// Outcome of ingesting a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Candidates written
    pub stored: usize,
    /// Valid candidates that lost to a resident row
    pub superseded: usize,
    /// Malformed candidates dropped
    pub skipped: usize,
}

impl RecordStore {
    /// Validate and store a batch of raw candidates.
    pub async fn ingest<I>(&self, values: I) -> Result<IngestReport>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut report = IngestReport::default();
        for value in values {
            let record = match Record::from_value(&value) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping malformed candidate: {}", e);
                    report.skipped += 1;
                    continue;
                }
            };
            if self.put_outcome(record).await?.written {
                report.stored += 1;
            } else {
                report.superseded += 1;
            }
        }
        Ok(report)
    }

    /// Fetch from `source` and ingest the result.
    pub async fn ingest_from(
        &self,
        source: &dyn RecordSource,
        query: &SourceQuery,
    ) -> Result<IngestReport> {
        let values = source.fetch(query).await?;
        let fetched = values.len();
        let report = self.ingest(values).await?;
        info!(
            "Ingested {} candidates: {} stored, {} superseded, {} skipped",
            fetched, report.stored, report.superseded, report.skipped
        );
        Ok(report)
    }
}
