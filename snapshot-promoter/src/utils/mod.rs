//! Utility modules for the snapshot promoter.

pub mod errors;
pub mod logger;

pub use errors::{CopyError, PromoterError, Result};
