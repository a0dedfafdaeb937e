//! In-memory snapshot store.
//!
//! One `MemoryBackend` models a single store type spanning several
//! locations; `MemorySnapshotStore` is a handle bound to one location.
//! Copies are driven by a per-location script of poll outcomes, which makes
//! the copy state machine reproducible in tests and dry runs.

use super::{CopyRequest, SnapshotStore, StoreError};
use crate::snapshot::{SnapshotRecord, SnapshotStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// What the next `describe_snapshot` of an in-flight copy observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedPoll {
    /// Still copying at this percentage
    Progress(u8),
    Available,
    Failed,
    /// The describe call itself fails
    Error(String),
}

#[derive(Default)]
struct LocationState {
    snapshots: Vec<SnapshotRecord>,
    copy_script: VecDeque<ScriptedPoll>,
    in_flight: HashMap<String, VecDeque<ScriptedPoll>>,
    copy_requests: Vec<CopyRequest>,
    deleted: Vec<String>,
    list_failure: Option<String>,
    copy_rejection: Option<String>,
    delete_failures: HashSet<String>,
}

/// Shared state behind every location handle.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    locations: Arc<Mutex<HashMap<String, LocationState>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a store handle bound to `location`
    pub fn handle(&self, location: &str) -> MemorySnapshotStore {
        self.lock().entry(location.to_string()).or_default();
        MemorySnapshotStore {
            location: location.to_string(),
            backend: self.clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, LocationState>> {
        // A panic while holding the lock leaves plain data behind; keep using it.
        self.locations.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Store handle for one location of a `MemoryBackend`.
#[derive(Clone)]
pub struct MemorySnapshotStore {
    location: String,
    backend: MemoryBackend,
}

impl MemorySnapshotStore {
    /// Convenience constructor for a single-location store
    pub fn new(location: &str) -> Self {
        MemoryBackend::new().handle(location)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LocationState) -> R) -> R {
        let mut locations = self.backend.lock();
        let state = locations.entry(self.location.clone()).or_default();
        f(state)
    }

    pub fn insert(&self, record: SnapshotRecord) {
        self.with_state(|s| s.snapshots.push(record));
    }

    /// Queue the poll outcomes the next copy into this location will report
    pub fn script_copy(&self, polls: impl IntoIterator<Item = ScriptedPoll>) {
        self.with_state(|s| s.copy_script = polls.into_iter().collect());
    }

    pub fn fail_listing(&self, message: &str) {
        self.with_state(|s| s.list_failure = Some(message.to_string()));
    }

    pub fn reject_copies(&self, message: &str) {
        self.with_state(|s| s.copy_rejection = Some(message.to_string()));
    }

    pub fn fail_delete(&self, snapshot_id: &str) {
        self.with_state(|s| {
            s.delete_failures.insert(snapshot_id.to_string());
        });
    }

    pub fn snapshots(&self) -> Vec<SnapshotRecord> {
        self.with_state(|s| s.snapshots.clone())
    }

    pub fn deleted(&self) -> Vec<String> {
        self.with_state(|s| s.deleted.clone())
    }

    pub fn copy_requests(&self) -> Vec<CopyRequest> {
        self.with_state(|s| s.copy_requests.clone())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    fn location(&self) -> &str {
        &self.location
    }

    async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<SnapshotRecord>, StoreError> {
        self.with_state(|s| {
            if let Some(message) = &s.list_failure {
                return Err(StoreError::Api {
                    operation: "list_snapshots".to_string(),
                    code: "InternalFailure".to_string(),
                    message: message.clone(),
                });
            }
            Ok(s
                .snapshots
                .iter()
                .filter(|r| r.instance_id == instance_id)
                .cloned()
                .collect())
        })
    }

    async fn copy_snapshot(&self, request: &CopyRequest) -> Result<SnapshotRecord, StoreError> {
        let mut locations = self.backend.lock();

        // The copy keeps the creation time and owner of its source
        let source = locations
            .get(&request.source_location)
            .and_then(|s| s.snapshots.iter().find(|r| r.arn == request.source_ref))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                operation: "copy_snapshot".to_string(),
                id: request.source_ref.clone(),
            })?;

        let state = locations.entry(self.location.clone()).or_default();
        state.copy_requests.push(request.clone());

        if let Some(message) = &state.copy_rejection {
            return Err(StoreError::Api {
                operation: "copy_snapshot".to_string(),
                code: "InvalidParameterValue".to_string(),
                message: message.clone(),
            });
        }
        if state.snapshots.iter().any(|r| r.id == request.target_name) {
            return Err(StoreError::Api {
                operation: "copy_snapshot".to_string(),
                code: "SnapshotAlreadyExists".to_string(),
                message: format!("snapshot {} already exists", request.target_name),
            });
        }

        let record = SnapshotRecord {
            id: request.target_name.clone(),
            arn: format!("arn:memory:{}:snapshot:{}", self.location, request.target_name),
            status: SnapshotStatus::Creating,
            created_at: source.created_at,
            progress_percent: 0,
            instance_id: source.instance_id,
        };

        let mut script = std::mem::take(&mut state.copy_script);
        if script.is_empty() {
            script.push_back(ScriptedPoll::Available);
        }
        state.in_flight.insert(record.id.clone(), script);
        state.snapshots.push(record.clone());

        Ok(record)
    }

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
        self.with_state(|s| {
            let next = s.in_flight.get_mut(snapshot_id).and_then(|script| script.pop_front());
            let record = s
                .snapshots
                .iter_mut()
                .find(|r| r.id == snapshot_id)
                .ok_or_else(|| StoreError::NotFound {
                    operation: "describe_snapshot".to_string(),
                    id: snapshot_id.to_string(),
                })?;

            match next {
                Some(ScriptedPoll::Progress(pct)) => record.progress_percent = pct.min(100),
                Some(ScriptedPoll::Available) => {
                    record.status = SnapshotStatus::Available;
                    record.progress_percent = 100;
                }
                Some(ScriptedPoll::Failed) => record.status = SnapshotStatus::Failed,
                Some(ScriptedPoll::Error(message)) => {
                    return Err(StoreError::Transport {
                        operation: "describe_snapshot".to_string(),
                        message,
                    })
                }
                None => {}
            }
            Ok(record.clone())
        })
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        self.with_state(|s| {
            if s.delete_failures.contains(snapshot_id) {
                return Err(StoreError::Api {
                    operation: "delete_snapshot".to_string(),
                    code: "InvalidSnapshotState".to_string(),
                    message: format!("snapshot {} is not in available state", snapshot_id),
                });
            }
            let before = s.snapshots.len();
            s.snapshots.retain(|r| r.id != snapshot_id);
            if s.snapshots.len() == before {
                return Err(StoreError::NotFound {
                    operation: "delete_snapshot".to_string(),
                    id: snapshot_id.to_string(),
                });
            }
            s.in_flight.remove(snapshot_id);
            s.deleted.push(snapshot_id.to_string());
            Ok(())
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    fn copy_request(source: &SnapshotRecord, target_name: &str) -> CopyRequest {
        CopyRequest {
            source_ref: source.arn.clone(),
            source_location: "src".to_string(),
            target_location: "dst".to_string(),
            target_name: target_name.to_string(),
            copy_tags: true,
            kms_key_id: None,
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_instance() {
        let store = MemorySnapshotStore::new("src");
        let now = Utc::now();
        store.insert(available_days_ago("orders", "a", now, 1));
        store.insert(available_days_ago("billing", "b", now, 1));

        let listed = store.list_snapshots("orders").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
    }

    #[tokio::test]
    async fn test_copy_follows_script() {
        let backend = MemoryBackend::new();
        let source = backend.handle("src");
        let target = backend.handle("dst");
        let snap = available_days_ago("orders", "orders-1", Utc::now(), 0);
        source.insert(snap.clone());
        target.script_copy([
            ScriptedPoll::Progress(40),
            ScriptedPoll::Error("throttled".to_string()),
            ScriptedPoll::Available,
        ]);

        let started = target.copy_snapshot(&copy_request(&snap, "orders-copy")).await.unwrap();
        assert_eq!(started.status, SnapshotStatus::Creating);
        assert_eq!(started.created_at, snap.created_at);
        assert_eq!(started.instance_id, "orders");

        let first = target.describe_snapshot("orders-copy").await.unwrap();
        assert_eq!(first.progress_percent, 40);
        assert!(target.describe_snapshot("orders-copy").await.is_err());
        let done = target.describe_snapshot("orders-copy").await.unwrap();
        assert!(done.is_available());
    }

    #[tokio::test]
    async fn test_copy_rejects_duplicate_name() {
        let backend = MemoryBackend::new();
        let source = backend.handle("src");
        let target = backend.handle("dst");
        let snap = available_days_ago("orders", "orders-1", Utc::now(), 0);
        source.insert(snap.clone());

        target.copy_snapshot(&copy_request(&snap, "dup")).await.unwrap();
        let err = target.copy_snapshot(&copy_request(&snap, "dup")).await.unwrap_err();
        assert!(matches!(err, StoreError::Api { ref code, .. } if code == "SnapshotAlreadyExists"));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_snapshot() {
        let store = MemorySnapshotStore::new("dst");
        store.insert(available_days_ago("orders", "old", Utc::now(), 40));
        store.fail_delete("old");

        assert!(store.delete_snapshot("old").await.is_err());
        assert_eq!(store.snapshots().len(), 1);
        assert!(store.deleted().is_empty());
    }
}
