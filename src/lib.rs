//! Execution tracking for wave-ordered plans run by external agents.
//!
//! One JSON state file per plan is the source of truth. Mutations go through
//! [`lifecycle::Tracker`], which serialises them with a per-file lock and
//! tracks run ownership with a time-limited lease stored in the state.

pub mod config;
pub mod context;
pub mod drift;
pub mod error;
pub mod export;
pub mod fs;
pub mod lifecycle;
pub mod logging;
pub mod models;
pub mod reconcile;
pub mod revision;
pub mod rollback;
pub mod scheduler;

pub use context::OpContext;
pub use error::{ErrorCategory, Result, TrackerError};
pub use lifecycle::Tracker;
