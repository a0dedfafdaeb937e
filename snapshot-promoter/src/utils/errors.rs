//! Custom error types for the snapshot promoter.

use crate::store::StoreError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PromoterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to query snapshots of {instance_id}: {source}")]
    RemoteQuery {
        instance_id: String,
        #[source]
        source: StoreError,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid inventory: {0}")]
    InvalidInventory(String),

    #[error("Snapshot store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Copy(#[from] CopyError),
}

/// Fatal outcomes of a copy operation.
///
/// A single failed progress poll is not represented here: the orchestrator
/// logs it, counts it and keeps polling.
#[derive(Error, Debug)]
pub enum CopyError {
    #[error("copy request rejected for {target_name}: {source}")]
    Initiation {
        target_name: String,
        #[source]
        source: StoreError,
    },

    #[error("snapshot copy {target_id} failed on the remote store")]
    Failed { target_id: String },

    #[error(
        "snapshot copy {target_id} isn't progressing, stalled at {progress}% for {}",
        crate::copy::progress::format_duration(.elapsed.as_secs())
    )]
    Stalled {
        target_id: String,
        elapsed: Duration,
        progress: u8,
    },

    #[error("snapshot copy {target_id} monitoring cancelled, the remote copy keeps running")]
    Cancelled { target_id: String },
}

pub type Result<T> = std::result::Result<T, PromoterError>;
