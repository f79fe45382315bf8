//! Out-of-memory risk monitoring and heap leak analysis.

pub mod analysis;
pub mod config;
pub mod format;
pub mod heap;
pub mod logging;
pub mod monitor;
pub mod system;
