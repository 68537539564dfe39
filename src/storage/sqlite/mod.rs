//! Shared `SQLite` infrastructure for the alias index and the block cache.
//!
//! ## Module Structure
//!
//! - [`connection`]: lock acquisition (poison recovery, bounded wait) and pragma configuration
//! - [`snapshot`]: in-memory database with dirty tracking and snapshot flushing
//! - [`metrics`]: shared metrics recording helpers
//!
//! Each store owns its own connection; nothing is shared between them.

mod connection;
mod metrics;
mod snapshot;

pub use connection::{
    MUTEX_LOCK_TIMEOUT, acquire_lock, acquire_lock_with_timeout, configure_connection,
};
pub use metrics::{OpStatus, record_operation_metrics};
pub use snapshot::SnapshotDb;
