//! Snapshot Promoter Library
//!
//! Copies the most recent available snapshot of a database instance to
//! another region and prunes promoted snapshots past their retention window.

pub mod config;
pub mod copy;
pub mod daemon;
pub mod promotion;
pub mod retention;
pub mod snapshot;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use promotion::{Promotion, PromotionPlan, PromotionReport};
pub use utils::errors::{CopyError, PromoterError};
pub type Result<T> = std::result::Result<T, PromoterError>;
