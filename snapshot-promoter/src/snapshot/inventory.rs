//! Point-in-time inventory of an instance's available snapshots.
//!
//! An `Inventory` only ever holds `available` records sorted ascending by
//! creation time. Both selection queries depend on that ordering, so the
//! type can only be built through constructors that establish or verify it.

use super::record::SnapshotRecord;
use crate::store::SnapshotStore;
use crate::utils::errors::{PromoterError, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Inventory {
    instance_id: String,
    snapshots: Vec<SnapshotRecord>,
}

impl Inventory {
    /// Query the store for every snapshot of `instance_id` and keep the
    /// available ones, oldest first.
    pub async fn fetch(store: &dyn SnapshotStore, instance_id: &str) -> Result<Self> {
        let records = store
            .list_snapshots(instance_id)
            .await
            .map_err(|source| PromoterError::RemoteQuery {
                instance_id: instance_id.to_string(),
                source,
            })?;

        let total = records.len();
        let inventory = Self::from_records(instance_id, records);
        debug!(
            "Fetched {} snapshots of {} in {} ({} available)",
            total,
            instance_id,
            store.location(),
            inventory.len()
        );

        Ok(inventory)
    }

    /// Filter to available records and sort them by creation time.
    pub fn from_records(instance_id: &str, records: Vec<SnapshotRecord>) -> Self {
        let mut snapshots: Vec<SnapshotRecord> =
            records.into_iter().filter(|s| s.is_available()).collect();
        snapshots.sort_by_key(|s| s.created_at);

        Self {
            instance_id: instance_id.to_string(),
            snapshots,
        }
    }

    /// Accept records that are already filtered and sorted, rejecting
    /// anything else.
    pub fn try_from_sorted(instance_id: &str, records: Vec<SnapshotRecord>) -> Result<Self> {
        if let Some(bad) = records.iter().find(|s| !s.is_available()) {
            return Err(PromoterError::InvalidInventory(format!(
                "snapshot {} has status {}, expected available",
                bad.id, bad.status
            )));
        }
        if let Some(pair) = records.windows(2).find(|w| w[0].created_at > w[1].created_at) {
            return Err(PromoterError::InvalidInventory(format!(
                "snapshot {} is older than its predecessor {}",
                pair[1].id, pair[0].id
            )));
        }

        Ok(Self {
            instance_id: instance_id.to_string(),
            snapshots: records,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotRecord> {
        self.snapshots.iter()
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.snapshots
    }

    /// The newest available snapshot.
    pub fn most_recent(&self) -> Result<&SnapshotRecord> {
        self.snapshots.last().ok_or_else(|| {
            PromoterError::NotFound(format!(
                "couldn't get last snapshot for {} instance, no available snapshots found",
                self.instance_id
            ))
        })
    }

    /// Snapshots created at or before `now - days`.
    ///
    /// A window reaching past the representable date range has nothing
    /// older than it.
    pub fn older_than_at(&self, now: DateTime<Utc>, days: u32) -> Vec<&SnapshotRecord> {
        let Some(cutoff) = Duration::try_days(i64::from(days)).and_then(|d| now.checked_sub_signed(d)) else {
            return Vec::new();
        };
        let mut old = Vec::new();

        for snapshot in &self.snapshots {
            if !snapshot.is_available() {
                continue;
            }
            // Sorted ascending, nothing after this one can be older
            if snapshot.created_at > cutoff {
                break;
            }
            old.push(snapshot);
        }

        old
    }
}
