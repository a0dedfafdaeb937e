//! Snapshot copy orchestrator.
//!
//! Submits a copy to the target store and polls the in-progress snapshot
//! until it becomes available, the store reports it failed, progress stalls
//! for longer than the timeout, or the run is cancelled.
//!
//! A failed poll is not fatal: the store's query path can be flaky while
//! the copy itself proceeds. Failed polls are counted and never touch the
//! stall clock.

pub mod progress;

use crate::snapshot::{SnapshotRecord, SnapshotStatus};
use crate::store::{CopyRequest, SnapshotStore, StoreError};
use crate::utils::errors::CopyError;
use progress::StallWatch;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default delay between two progress polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Copy options forwarded to the store
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub copy_tags: bool,
    /// Encrypt the copy with this key
    pub kms_key_id: Option<String>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            copy_tags: true,
            kms_key_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Pending,
    Succeeded,
    Stalled,
    Failed,
    Cancelled,
}

impl CopyState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CopyState::Pending)
    }
}

/// In-flight copy, mutated once per poll
#[derive(Debug)]
pub struct CopyOperation {
    target_id: String,
    state: CopyState,
    watch: StallWatch,
    last_seen: Option<SnapshotRecord>,
    polls: u32,
    poll_failures: u32,
}

impl CopyOperation {
    pub fn new(target_id: String, stall_timeout: Duration) -> Self {
        Self {
            target_id,
            state: CopyState::Pending,
            watch: StallWatch::new(stall_timeout),
            last_seen: None,
            polls: 0,
            poll_failures: 0,
        }
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn poll_failures(&self) -> u32 {
        self.poll_failures
    }

    pub fn best_percent(&self) -> u8 {
        self.watch.best_percent()
    }

    /// Apply the result of one describe call and return the new state.
    pub fn observe(&mut self, poll: Result<SnapshotRecord, StoreError>) -> CopyState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.polls += 1;

        match poll {
            Err(e) => {
                self.poll_failures += 1;
                warn!("failed to get copy progress of {}: {}", self.target_id, e);
            }
            Ok(record) if record.is_available() => {
                self.state = CopyState::Succeeded;
                self.last_seen = Some(record);
                return self.state;
            }
            Ok(record) if record.status == SnapshotStatus::Failed => {
                self.state = CopyState::Failed;
                self.last_seen = Some(record);
                return self.state;
            }
            Ok(record) => {
                if self.watch.observe(record.progress_percent) {
                    debug!("copy of {} advanced to {}%", self.target_id, record.progress_percent);
                }
                info!("{}%, still copying...", record.progress_percent);
                self.last_seen = Some(record);
            }
        }

        if self.watch.is_stalled() {
            self.state = CopyState::Stalled;
        }
        self.state
    }

    fn into_report(self) -> CopyReport {
        CopyReport {
            elapsed: self.watch.elapsed(),
            target_id: self.target_id,
            target: self.last_seen,
            polls: self.polls,
            poll_failures: self.poll_failures,
        }
    }
}

/// Proof that a copy finished successfully.
///
/// Pruning takes one of these, so deletes cannot be issued before the copy
/// has completed.
#[derive(Debug, Clone)]
pub struct CopyReport {
    pub target_id: String,
    /// Last record observed for the copy (available)
    pub target: Option<SnapshotRecord>,
    pub polls: u32,
    pub poll_failures: u32,
    pub elapsed: Duration,
}

/// Drives one copy on the target store
pub struct CopyOrchestrator {
    store: Arc<dyn SnapshotStore>,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl CopyOrchestrator {
    /// Create an orchestrator for copies into `store` (no cancellation support)
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Abort polling when `cancel` fires
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Copy `source_ref` (living in `source_location`) into this store under
    /// `target_name` and wait for it to become available.
    pub async fn copy(
        &self,
        source_ref: &str,
        source_location: &str,
        target_name: &str,
        options: &CopyOptions,
        stall_timeout: Duration,
    ) -> Result<CopyReport, CopyError> {
        let request = CopyRequest {
            source_ref: source_ref.to_string(),
            source_location: source_location.to_string(),
            target_location: self.store.location().to_string(),
            target_name: target_name.to_string(),
            copy_tags: options.copy_tags,
            kms_key_id: options.kms_key_id.clone(),
        };

        let started = self
            .store
            .copy_snapshot(&request)
            .await
            .map_err(|source| CopyError::Initiation {
                target_name: target_name.to_string(),
                source,
            })?;

        info!(
            "copying snapshot to {}/{} ...",
            request.target_location, request.target_name
        );

        let mut op = CopyOperation::new(started.id, stall_timeout);
        self.monitor(&mut op).await?;

        info!(
            "copy completed! ({} polls, {} failed)",
            op.polls(),
            op.poll_failures()
        );
        Ok(op.into_report())
    }

    /// Poll until `op` reaches a terminal state.
    pub async fn monitor(&self, op: &mut CopyOperation) -> Result<(), CopyError> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(stop_watching(op)),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            // A slow describe call must not delay cancellation
            let target_id = op.target_id.clone();
            let poll = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(stop_watching(op)),
                poll = self.store.describe_snapshot(&target_id) => poll,
            };
            match op.observe(poll) {
                CopyState::Pending => continue,
                CopyState::Succeeded => return Ok(()),
                CopyState::Failed => {
                    error!("store reported copy {} as failed", op.target_id);
                    return Err(CopyError::Failed {
                        target_id: op.target_id.clone(),
                    });
                }
                CopyState::Stalled => {
                    return Err(CopyError::Stalled {
                        target_id: op.target_id.clone(),
                        elapsed: op.watch.since_progress(),
                        progress: op.best_percent(),
                    });
                }
                CopyState::Cancelled => {
                    return Err(CopyError::Cancelled {
                        target_id: op.target_id.clone(),
                    });
                }
            }
        }
    }
}

fn stop_watching(op: &mut CopyOperation) -> CopyError {
    op.state = CopyState::Cancelled;
    warn!("stopped watching copy {} at {}%", op.target_id, op.best_percent());
    CopyError::Cancelled {
        target_id: op.target_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::fixtures::available_days_ago;
    use crate::store::memory::{MemoryBackend, MemorySnapshotStore, ScriptedPoll};
    use chrono::Utc;

    const POLL: Duration = Duration::from_secs(10);
    const STALL: Duration = Duration::from_secs(30);

    struct Fixture {
        source: MemorySnapshotStore,
        target: MemorySnapshotStore,
        source_arn: String,
    }

    fn fixture(script: Vec<ScriptedPoll>) -> Fixture {
        let backend = MemoryBackend::new();
        let source = backend.handle("src");
        let target = backend.handle("dst");
        let snap = available_days_ago("orders", "orders-1", Utc::now(), 0);
        let source_arn = snap.arn.clone();
        source.insert(snap);
        target.script_copy(script);
        Fixture { source, target, source_arn }
    }

    fn orchestrator(f: &Fixture) -> CopyOrchestrator {
        CopyOrchestrator::new(Arc::new(f.target.clone())).with_poll_interval(POLL)
    }

    async fn run(f: &Fixture, orch: &CopyOrchestrator) -> Result<CopyReport, CopyError> {
        orch.copy(
            &f.source_arn,
            f.source.location(),
            "orders-copy",
            &CopyOptions::default(),
            STALL,
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_flat_progress_stalls() {
        use ScriptedPoll::*;
        let f = fixture(vec![Progress(10), Progress(10), Progress(10), Progress(10)]);

        let err = run(&f, &orchestrator(&f)).await.unwrap_err();
        match err {
            CopyError::Stalled { elapsed, progress, .. } => {
                assert_eq!(elapsed, Duration::from_secs(30));
                assert_eq!(progress, 10);
            }
            other => panic!("expected stall, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_advancing_progress_completes() {
        use ScriptedPoll::*;
        let f = fixture(vec![Progress(10), Progress(20), Progress(20), Progress(30), Available]);

        let report = run(&f, &orchestrator(&f)).await.unwrap();
        assert_eq!(report.polls, 5);
        assert_eq!(report.poll_failures, 0);
        assert_eq!(report.elapsed, Duration::from_secs(50));
        assert!(report.target.unwrap().is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_error_is_not_fatal() {
        use ScriptedPoll::*;
        let f = fixture(vec![
            Progress(10),
            Progress(20),
            Error("throttled".to_string()),
            Progress(30),
            Available,
        ]);

        let report = run(&f, &orchestrator(&f)).await.unwrap();
        assert_eq!(report.poll_failures, 1);
        assert_eq!(report.polls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_do_not_reset_stall_clock() {
        use ScriptedPoll::*;
        let f = fixture(vec![
            Progress(10),
            Error("timeout".to_string()),
            Error("timeout".to_string()),
            Error("timeout".to_string()),
            Available,
        ]);

        let err = run(&f, &orchestrator(&f)).await.unwrap_err();
        assert!(matches!(err, CopyError::Stalled { progress: 10, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regressed_progress_does_not_extend_deadline() {
        use ScriptedPoll::*;
        let f = fixture(vec![Progress(50), Progress(20), Progress(40), Progress(50), Available]);

        let err = run(&f, &orchestrator(&f)).await.unwrap_err();
        assert!(matches!(err, CopyError::Stalled { progress: 50, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failure_is_distinct_from_stall() {
        use ScriptedPoll::*;
        let f = fixture(vec![Progress(10), Failed]);

        let err = run(&f, &orchestrator(&f)).await.unwrap_err();
        assert!(matches!(err, CopyError::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_copy_is_initiation_error() {
        let f = fixture(vec![]);
        f.target.reject_copies("KMS key not found");

        let err = run(&f, &orchestrator(&f)).await.unwrap_err();
        assert!(matches!(err, CopyError::Initiation { .. }));
        assert!(err.to_string().contains("KMS key not found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_polling() {
        use ScriptedPoll::*;
        let f = fixture(vec![Progress(10), Progress(20), Available]);
        let cancel = CancellationToken::new();
        let orch = orchestrator(&f).with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            cancel.cancel();
        });

        let err = run(&f, &orch).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, CopyError::Cancelled { .. }));
        // The remote copy is left in place
        assert_eq!(f.target.snapshots().len(), 1);
    }

    /// Store whose describe calls hang far longer than any poll interval
    struct HangingDescribe(MemorySnapshotStore);

    #[async_trait::async_trait]
    impl SnapshotStore for HangingDescribe {
        fn location(&self) -> &str {
            self.0.location()
        }

        async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<SnapshotRecord>, StoreError> {
            self.0.list_snapshots(instance_id).await
        }

        async fn copy_snapshot(&self, request: &CopyRequest) -> Result<SnapshotRecord, StoreError> {
            self.0.copy_snapshot(request).await
        }

        async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            self.0.describe_snapshot(snapshot_id).await
        }

        async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
            self.0.delete_snapshot(snapshot_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_in_flight_describe() {
        let f = fixture(vec![ScriptedPoll::Available]);
        let cancel = CancellationToken::new();
        let orch = CopyOrchestrator::new(Arc::new(HangingDescribe(f.target.clone())))
            .with_poll_interval(POLL)
            .with_cancel(cancel.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            cancel.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = run(&f, &orch).await.unwrap_err();
        canceller.await.unwrap();
        assert!(matches!(err, CopyError::Cancelled { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[test]
    fn test_copy_request_carries_options() {
        let options = CopyOptions {
            copy_tags: false,
            kms_key_id: Some("alias/backups".to_string()),
        };
        assert!(!options.copy_tags);
        assert_eq!(options.kms_key_id.as_deref(), Some("alias/backups"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_forwarded_to_store() {
        let f = fixture(vec![ScriptedPoll::Available]);
        let options = CopyOptions {
            copy_tags: false,
            kms_key_id: Some("alias/backups".to_string()),
        };

        orchestrator(&f)
            .copy(&f.source_arn, "src", "orders-copy", &options, STALL)
            .await
            .unwrap();

        let requests = f.target.copy_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].target_location, "dst");
        assert_eq!(requests[0].kms_key_id.as_deref(), Some("alias/backups"));
        assert!(!requests[0].copy_tags);
    }
}
