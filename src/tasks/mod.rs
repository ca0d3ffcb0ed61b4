//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Stat-cache cleanup: purges expired filesystem-status entries

mod cleanup;

pub use cleanup::spawn_cleanup_task;
