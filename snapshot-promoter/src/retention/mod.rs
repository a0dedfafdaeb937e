//! Retention pruning of promoted snapshots.
//!
//! Deletes are best-effort: every candidate gets its own request, a failed
//! delete is recorded and the next candidate is still processed. There is
//! no rollback.

use crate::copy::CopyReport;
use crate::snapshot::Inventory;
use crate::store::SnapshotStore;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// One delete that did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub snapshot_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PruneReport {
    /// Snapshots that fell outside the retention window
    pub candidates: Vec<String>,
    pub deleted: Vec<String>,
    pub failures: Vec<PruneFailure>,
}

impl PruneReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Pruner {
    store: Arc<dyn SnapshotStore>,
    dry_run: bool,
}

impl Pruner {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            dry_run: false,
        }
    }

    /// Report candidates without deleting them
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Prune once `completed` proves the new copy is in place.
    pub async fn prune_after(&self, completed: &CopyReport, instance_id: &str, retention_days: u32) -> Result<PruneReport> {
        info!(
            "copy {} confirmed, pruning {} in {}",
            completed.target_id,
            instance_id,
            self.store.location()
        );
        self.prune(instance_id, retention_days).await
    }

    pub(crate) async fn prune(&self, instance_id: &str, retention_days: u32) -> Result<PruneReport> {
        self.prune_at(Utc::now(), instance_id, retention_days).await
    }

    /// Delete every snapshot of `instance_id` created at or before
    /// `now - retention_days`.
    pub(crate) async fn prune_at(&self, now: DateTime<Utc>, instance_id: &str, retention_days: u32) -> Result<PruneReport> {
        info!(
            "looking for old snapshots which match {} retention days...",
            retention_days
        );

        let inventory = Inventory::fetch(self.store.as_ref(), instance_id).await?;
        let old = inventory.older_than_at(now, retention_days);

        let mut report = PruneReport {
            candidates: old.iter().map(|s| s.id.clone()).collect(),
            ..Default::default()
        };
        info!("found {} snapshots to delete", report.candidates.len());

        if self.dry_run {
            for id in &report.candidates {
                info!("dry run, would delete snapshot: {}", id);
            }
            return Ok(report);
        }

        for snapshot in old {
            info!("deleting snapshot: {}", snapshot.id);
            match self.store.delete_snapshot(&snapshot.id).await {
                Ok(()) => report.deleted.push(snapshot.id.clone()),
                Err(e) => {
                    warn!("failed to delete snapshot {}: {}", snapshot.id, e);
                    report.failures.push(PruneFailure {
                        snapshot_id: snapshot.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::available_days_ago;
    use crate::store::memory::MemorySnapshotStore;
    use crate::utils::errors::PromoterError;

    fn seeded(now: DateTime<Utc>) -> MemorySnapshotStore {
        let store = MemorySnapshotStore::new("dst");
        store.insert(available_days_ago("orders", "d1", now, 1));
        store.insert(available_days_ago("orders", "d40", now, 40));
        store.insert(available_days_ago("orders", "d10", now, 10));
        store.insert(available_days_ago("orders", "d35", now, 35));
        store
    }

    #[tokio::test]
    async fn test_prune_deletes_outside_window() {
        let now = Utc::now();
        let store = seeded(now);
        let pruner = Pruner::new(Arc::new(store.clone()));

        let report = pruner.prune_at(now, "orders", 30).await.unwrap();
        assert_eq!(report.candidates, vec!["d40", "d35"]);
        assert_eq!(report.deleted_count(), 2);
        assert!(report.is_clean());
        assert_eq!(store.deleted(), vec!["d40", "d35"]);
        assert_eq!(store.snapshots().len(), 2);
    }

    #[tokio::test]
    async fn test_prune_continues_past_failures() {
        let now = Utc::now();
        let store = seeded(now);
        store.fail_delete("d40");
        let pruner = Pruner::new(Arc::new(store.clone()));

        let report = pruner.prune_at(now, "orders", 30).await.unwrap();
        assert_eq!(report.deleted, vec!["d35"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].snapshot_id, "d40");
        assert!(report.failures[0].reason.contains("not in available state"));
    }

    #[tokio::test]
    async fn test_dry_run_issues_no_deletes() {
        let now = Utc::now();
        let store = seeded(now);
        let pruner = Pruner::new(Arc::new(store.clone())).dry_run(true);

        let report = pruner.prune_at(now, "orders", 30).await.unwrap();
        assert_eq!(report.candidates.len(), 2);
        assert_eq!(report.deleted_count(), 0);
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_retention_beyond_date_range_deletes_nothing() {
        let now = Utc::now();
        let store = seeded(now);
        let pruner = Pruner::new(Arc::new(store.clone()));

        let report = pruner.prune_at(now, "orders", 100_000_000).await.unwrap();
        assert!(report.candidates.is_empty());
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_inventory_failure_is_fatal() {
        let store = MemorySnapshotStore::new("dst");
        store.fail_listing("service unavailable");
        let pruner = Pruner::new(Arc::new(store));

        let err = pruner.prune("orders", 30).await.unwrap_err();
        assert!(matches!(err, PromoterError::RemoteQuery { .. }));
    }
}
