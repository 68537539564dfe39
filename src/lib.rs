//! # Blockcache
//!
//! Block caching and identifier aliasing for agents that navigate a
//! hierarchical block workspace (pages, databases and nested blocks).
//!
//! Agents refer to documents through small integer aliases instead of
//! 128-bit identifiers. Fetched objects are cached per object kind with TTL
//! and freshness-driven invalidation, and a per-turn [`BlockTree`] records
//! which blocks were visited so the hierarchy can be rendered back into the
//! agent context.
//!
//! ## Layers
//!
//! - [`models`]: [`DocumentId`], [`ObjectKind`], [`Alias`] and the per-turn [`BlockTree`]
//! - [`storage`]: the durable [`AliasIndex`] and [`BlockCache`], plus the background flush task
//! - [`services`]: the [`CacheOrchestrator`] implementing cache-or-fetch per object kind
//!
//! ## Example
//!
//! ```rust,ignore
//! use blockcache::{AliasIndex, BlockCache, CacheOrchestrator, DocumentId};
//! use std::sync::Arc;
//!
//! let aliases = Arc::new(AliasIndex::in_memory()?);
//! let cache = Arc::new(BlockCache::in_memory()?);
//! let orchestrator = CacheOrchestrator::new(aliases, cache);
//!
//! let id = DocumentId::parse("0123456789abcdef0123456789abcdef")?;
//! let page = orchestrator
//!     .get_or_fetch_page(id, || async { client.fetch_page(id).await })
//!     .await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{Config, StorageSettings, TtlSettings};
pub use models::{Alias, BlockTree, CacheKey, DocumentId, IdentifierInput, ObjectKind};
pub use services::{AliasMap, CacheOrchestrator, RemoteSource};
pub use storage::{AliasIndex, BlockCache, CacheMetrics, FlushScheduler, Flushable};

/// Error type for blockcache operations.
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidIdentifier` | A raw identifier does not normalize to 32 hex characters |
/// | `ObjectTypeMismatch` | A known identifier is used as the wrong [`ObjectKind`] |
/// | `BlockTreeRequired` | A tree-dependent operation is called without a [`BlockTree`] |
/// | `InvalidInput` | Malformed non-identifier input such as configuration values |
/// | `OperationFailed` | `SQLite` errors, lock timeouts, snapshot I/O |
#[derive(Debug, ThisError)]
pub enum Error {
    /// The input could not be parsed as a document identifier.
    #[error("invalid identifier: '{raw}'")]
    InvalidIdentifier {
        /// The raw input as received.
        raw: String,
    },

    /// A known identifier was used as the wrong object kind.
    ///
    /// Raised by [`BlockCache::verify_kind_or_raise`] before database queries,
    /// so the agent layer can report a corrected request.
    #[error("{id} is a {} not a {expected}", kinds_display(.actual))]
    ObjectTypeMismatch {
        /// The identifier that was checked.
        id: DocumentId,
        /// The kind the caller expected.
        expected: ObjectKind,
        /// The kinds the identifier is actually cached as.
        actual: Vec<ObjectKind>,
    },

    /// A block traversal was requested without a [`BlockTree`] to record into.
    #[error("operation '{operation}' requires a block tree")]
    BlockTreeRequired {
        /// The operation that needed the tree.
        operation: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

fn kinds_display(kinds: &[ObjectKind]) -> String {
    kinds
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Result type alias for blockcache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
