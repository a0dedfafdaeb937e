//! Snapshot model and the filtered, ordered inventory built on top of it.

pub mod inventory;
pub mod record;

pub use inventory::Inventory;
pub use record::{SnapshotRecord, SnapshotStatus};
