//! Backup store capability consumed by the promoter.
//!
//! The promoter only needs four operations from the store. Each location
//! (source and target) gets its own handle, passed explicitly to the
//! components that use it.

pub mod http;
pub mod memory;

use crate::snapshot::SnapshotRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by a snapshot store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store answered and refused the request
    #[error("{operation}: {message}")]
    Api {
        operation: String,
        code: String,
        message: String,
    },

    #[error("{operation}: snapshot {id} not found")]
    NotFound { operation: String, id: String },

    #[error("{operation}: transport error: {message}")]
    Transport { operation: String, message: String },

    #[error("credentials rejected for {location}: {message}")]
    Credentials { location: String, message: String },

    #[error("{operation}: malformed response: {message}")]
    Decode { operation: String, message: String },
}

/// Parameters of a snapshot copy, submitted to the target store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
    /// Cross-location reference of the snapshot to copy
    pub source_ref: String,
    pub source_location: String,
    pub target_location: String,
    pub target_name: String,
    pub copy_tags: bool,
    /// Encrypt the copy with this key when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Location (region) this handle talks to
    fn location(&self) -> &str;

    async fn list_snapshots(&self, instance_id: &str) -> Result<Vec<SnapshotRecord>, StoreError>;

    /// Start an asynchronous copy and return the in-progress target snapshot
    async fn copy_snapshot(&self, request: &CopyRequest) -> Result<SnapshotRecord, StoreError>;

    async fn describe_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError>;

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError>;
}
