//! Configuration management for the snapshot promoter.
//!
//! Loads configuration from a TOML file; command line flags override it in
//! `main`.

use crate::copy::CopyOptions;
use crate::promotion::PromotionPlan;
use crate::utils::errors::{PromoterError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source DB instance name
    #[serde(default)]
    pub db_name: Option<String>,

    pub source: LocationConfig,

    /// Copy destination (defaults to the source location)
    #[serde(default)]
    pub target: Option<LocationConfig>,

    #[serde(default)]
    pub copy: CopyConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    /// Region where the snapshots live
    pub region: String,

    /// Snapshot store API endpoint for this region
    pub endpoint: String,

    /// Bearer token for the store API
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    /// Copy all tags from the source snapshot to the target snapshot
    #[serde(default = "default_copy_tags")]
    pub copy_tags: bool,

    /// KMS key ID or ARN in the target region; the copy is encrypted when set
    #[serde(default)]
    pub kms_key_id: Option<String>,

    /// Minutes without progress before a copy is considered stalled
    #[serde(default = "default_progress_timeout")]
    pub progress_timeout_minutes: u64,

    /// Seconds between two progress polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Per-request timeout against the store API
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Remove target snapshots older than this many days after a successful copy
    #[serde(default = "default_retention_days")]
    pub days: u32,

    /// Only report what would be deleted
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_copy_tags() -> bool {
    true
}

fn default_progress_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_retention_days() -> u32 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            copy_tags: default_copy_tags(),
            kms_key_id: None,
            progress_timeout_minutes: default_progress_timeout(),
            poll_interval_secs: default_poll_interval(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            dry_run: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_name: None,
            source: LocationConfig {
                region: "us-east-1".to_string(),
                endpoint: "http://localhost:8080".to_string(),
                token: None,
            },
            target: None,
            copy: CopyConfig::default(),
            retention: RetentionConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Target location, falling back to the source
    pub fn target(&self) -> &LocationConfig {
        self.target.as_ref().unwrap_or(&self.source)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.copy.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        match self.db_name.as_deref() {
            None | Some("") => {
                return Err(PromoterError::Config("db-name is required argument.".to_string()))
            }
            Some(_) => {}
        }
        if self.source.region.is_empty() {
            return Err(PromoterError::Config("source region must not be empty".to_string()));
        }
        let target = self.target();
        if target.region != self.source.region && target.endpoint == self.source.endpoint {
            return Err(PromoterError::Config(format!(
                "target region {} needs its own endpoint, {} serves {}",
                target.region, self.source.endpoint, self.source.region
            )));
        }
        if self.copy.poll_interval_secs == 0 {
            return Err(PromoterError::Config("poll interval must be at least 1 second".to_string()));
        }
        if self.copy.progress_timeout_minutes == 0 {
            return Err(PromoterError::Config("progress timeout must be at least 1 minute".to_string()));
        }
        Ok(())
    }

    /// Build the promotion plan for a validated config
    pub fn plan(&self) -> Result<PromotionPlan> {
        self.validate()?;
        let instance_id = self.db_name.as_deref().unwrap_or_default();

        let mut plan = PromotionPlan::new(instance_id);
        plan.options = CopyOptions {
            copy_tags: self.copy.copy_tags,
            kms_key_id: self.copy.kms_key_id.clone().filter(|k| !k.is_empty()),
        };
        plan.retention_days = self.retention.days;
        plan.stall_timeout = Duration::from_secs(self.copy.progress_timeout_minutes * 60);
        plan.poll_interval = Duration::from_secs(self.copy.poll_interval_secs);
        plan.dry_run = self.retention.dry_run;
        Ok(plan)
    }
}
