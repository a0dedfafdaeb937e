//! Process-level concerns of the promoter run.

pub mod shutdown;
