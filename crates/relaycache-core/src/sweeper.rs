//! Age-based expiration.
//!
//! A sweep removes rows whose `added_at` is older than `now - ttl` for each
//! configured partition, all in one transaction. The sweeper never schedules
//! itself beyond the single startup run; further sweeps are triggered by the
//! caller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::database::{self, set_metadata};
use crate::error::Result;
use crate::registry;
use crate::store::RecordStore;

/// Metadata key holding the time of the last completed sweep.
pub const LAST_SWEEP_KEY: &str = "last_sweep_at";

/// Time-to-live for one partition.
///
/// `Never` skips the partition entirely; `After(Duration::ZERO)` removes
/// every row added before the sweep started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    Never,
    After(Duration),
}

impl Ttl {
    /// Oldest `added_at` that survives a sweep at `now`, or `None` for `Never`.
    pub fn cutoff(self, now_millis: i64) -> Option<i64> {
        match self {
            Ttl::Never => None,
            Ttl::After(ttl) => {
                let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Some(now_millis.saturating_sub(ttl))
            }
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Wall-clock time the sweep ran at (unix millis)
    pub swept_at: i64,
    /// Rows removed per swept partition
    pub removed: BTreeMap<String, usize>,
    /// Configured partitions that were not on disk
    pub missing: Vec<String>,
}

impl SweepReport {
    pub fn total_removed(&self) -> usize {
        self.removed.values().sum()
    }
}

/// Removes expired rows from a fixed set of partitions.
#[derive(Debug, Clone, Default)]
pub struct ExpirationSweeper {
    policies: Arc<Vec<(String, Ttl)>>,
}

impl ExpirationSweeper {
    pub fn new<S: Into<String>>(policies: impl IntoIterator<Item = (S, Ttl)>) -> Self {
        Self {
            policies: Arc::new(
                policies
                    .into_iter()
                    .map(|(name, ttl)| (name.into(), ttl))
                    .collect(),
            ),
        }
    }

    pub fn policies(&self) -> &[(String, Ttl)] {
        &self.policies
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Run one sweep over every configured partition.
    pub async fn sweep(&self, store: &RecordStore) -> Result<SweepReport> {
        let policies = Arc::clone(&self.policies);
        let clock = Arc::clone(store.database().clock());

        store
            .database()
            .call(move |conn| {
                let now = clock.now_millis();
                let tx = conn.transaction()?;
                let tables = database::existing_tables(&tx)?;
                let mut report = SweepReport {
                    swept_at: now,
                    ..Default::default()
                };

                for (name, ttl) in policies.iter() {
                    let Some(cutoff) = ttl.cutoff(now) else {
                        debug!("Partition {} never expires, skipping", name);
                        continue;
                    };
                    // Only registry names are ever interpolated into SQL
                    let Some(spec) = registry::partition_by_name(name) else {
                        warn!("Unknown partition {} in expiration policy, skipping", name);
                        report.missing.push(name.clone());
                        continue;
                    };
                    if !tables.contains(spec.name) {
                        warn!("Partition {} not yet created, skipping expiration", spec.name);
                        report.missing.push(name.clone());
                        continue;
                    }

                    let removed = tx.execute(
                        &format!("DELETE FROM \"{}\" WHERE added_at < ?1", spec.name),
                        [cutoff],
                    )?;
                    debug!("Expired {} rows from {}", removed, spec.name);
                    report.removed.insert(spec.name.to_string(), removed);
                }

                set_metadata(&tx, LAST_SWEEP_KEY, &now.to_string())?;
                tx.commit()?;
                Ok(report)
            })
            .await
    }

    /// Run a single sweep after `delay` on the tokio runtime.
    pub fn spawn_startup(self, store: RecordStore, delay: Duration) -> JoinHandle<Result<SweepReport>> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let result = self.sweep(&store).await;
            match &result {
                Ok(report) => info!(
                    "Startup sweep removed {} rows from {} partitions",
                    report.total_removed(),
                    report.removed.len()
                ),
                Err(e) => warn!("Startup sweep failed: {}", e),
            }
            result
        })
    }
}
