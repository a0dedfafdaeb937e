//! End-to-end promotion run.
//!
//! Source inventory -> newest available snapshot -> copy into the target
//! location -> target inventory (re-queried) -> retention pruning. Each
//! step runs after the previous one finished; pruning needs the
//! `CopyReport` of a successful copy.

use crate::copy::{CopyOptions, CopyOrchestrator, CopyReport, DEFAULT_POLL_INTERVAL};
use crate::retention::{PruneReport, Pruner};
use crate::snapshot::{Inventory, SnapshotRecord};
use crate::store::SnapshotStore;
use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// What to promote and how
#[derive(Debug, Clone)]
pub struct PromotionPlan {
    pub instance_id: String,
    pub options: CopyOptions,
    pub retention_days: u32,
    pub stall_timeout: Duration,
    pub poll_interval: Duration,
    pub dry_run: bool,
}

impl PromotionPlan {
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            options: CopyOptions::default(),
            retention_days: 30,
            stall_timeout: Duration::from_secs(60 * 60),
            poll_interval: DEFAULT_POLL_INTERVAL,
            dry_run: false,
        }
    }
}

#[derive(Debug)]
pub struct PromotionReport {
    pub source_snapshot: SnapshotRecord,
    pub target_name: String,
    pub copy: CopyReport,
    pub prune: PruneReport,
}

/// Name of the promoted copy: instance id plus the source creation minute.
pub fn target_snapshot_name(instance_id: &str, created_at: DateTime<Utc>) -> String {
    format!("{}-{}", instance_id, created_at.format("%Y-%m-%d-%H-%M"))
}

pub struct Promotion {
    source: Arc<dyn SnapshotStore>,
    target: Arc<dyn SnapshotStore>,
    plan: PromotionPlan,
    cancel: CancellationToken,
}

impl Promotion {
    pub fn new(source: Arc<dyn SnapshotStore>, target: Arc<dyn SnapshotStore>, plan: PromotionPlan) -> Self {
        Self {
            source,
            target,
            plan,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self) -> Result<PromotionReport> {
        let plan = &self.plan;

        info!(
            "getting most recent snapshot of {}/{} instance",
            self.source.location(),
            plan.instance_id
        );
        let source_inventory = Inventory::fetch(self.source.as_ref(), &plan.instance_id).await?;
        let latest = source_inventory.most_recent()?.clone();
        info!("found recent snapshot {}", latest.id);

        let target_name = target_snapshot_name(&plan.instance_id, latest.created_at);
        if let Some(key) = &plan.options.kms_key_id {
            info!("using [{}] KMS key ID for encryption", key);
        }

        let copied = CopyOrchestrator::new(self.target.clone())
            .with_poll_interval(plan.poll_interval)
            .with_cancel(self.cancel.clone())
            .copy(
                &latest.arn,
                self.source.location(),
                &target_name,
                &plan.options,
                plan.stall_timeout,
            )
            .await?;

        let prune = Pruner::new(self.target.clone())
            .dry_run(plan.dry_run)
            .prune_after(&copied, &plan.instance_id, plan.retention_days)
            .await?;

        info!(
            "all done! promoted {} as {}, deleted {} old snapshots ({} failed)",
            latest.id,
            target_name,
            prune.deleted_count(),
            prune.failures.len()
        );

        Ok(PromotionReport {
            source_snapshot: latest,
            target_name,
            copy: copied,
            prune,
        })
    }
}
