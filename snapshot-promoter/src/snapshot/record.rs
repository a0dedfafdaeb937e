//! Snapshot records as reported by the backup store.
//!
//! A record is a point-in-time copy of remote state. Nothing in the
//! promoter mutates one after it has been fetched; a fresh query produces a
//! fresh record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Lifecycle status of a snapshot on the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SnapshotStatus {
    Creating,
    Available,
    Failed,
    Deleting,
    /// Any status string the promoter has no special handling for
    Other(String),
}

impl SnapshotStatus {
    pub fn as_str(&self) -> &str {
        match self {
            SnapshotStatus::Creating => "creating",
            SnapshotStatus::Available => "available",
            SnapshotStatus::Failed => "failed",
            SnapshotStatus::Deleting => "deleting",
            SnapshotStatus::Other(s) => s,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SnapshotStatus::Available)
    }
}

impl From<&str> for SnapshotStatus {
    fn from(value: &str) -> Self {
        match value {
            "creating" => SnapshotStatus::Creating,
            "available" => SnapshotStatus::Available,
            "failed" => SnapshotStatus::Failed,
            "deleting" => SnapshotStatus::Deleting,
            other => SnapshotStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SnapshotStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SnapshotStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SnapshotStatus::from(raw.as_str()))
    }
}

/// One backup artifact of a database instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    /// Store-local identifier
    pub id: String,

    /// Reference usable from another location (e.g. an ARN)
    pub arn: String,

    pub status: SnapshotStatus,

    pub created_at: DateTime<Utc>,

    /// Copy progress (0-100), only meaningful while the snapshot is being copied
    #[serde(default)]
    pub progress_percent: u8,

    pub instance_id: String,
}

impl SnapshotRecord {
    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_from_str() {
        assert_eq!(SnapshotStatus::from("available"), SnapshotStatus::Available);
        assert_eq!(SnapshotStatus::from("creating"), SnapshotStatus::Creating);
        assert_eq!(
            SnapshotStatus::from("incompatible-restore"),
            SnapshotStatus::Other("incompatible-restore".to_string())
        );
    }

    #[test]
    fn test_record_deserialize_unknown_status() {
        let json = r#"{
            "id": "orders-2024-05-01",
            "arn": "arn:store:eu-west-1:snapshot:orders-2024-05-01",
            "status": "copying",
            "createdAt": "2024-05-01T03:00:00Z",
            "instanceId": "orders"
        }"#;
        let record: SnapshotRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.status, SnapshotStatus::Other("copying".to_string()));
        assert_eq!(record.progress_percent, 0);
        assert_eq!(record.created_at, Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap());
        assert!(!record.is_available());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SnapshotStatus::Deleting).unwrap();
        assert_eq!(json, "\"deleting\"");
    }
}
