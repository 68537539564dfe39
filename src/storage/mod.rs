//! Durable stores.
//!
//! Two independent stores, each an in-memory `SQLite` database mirrored to a
//! snapshot file:
//! - [`AliasIndex`]: `DocumentId` to alias mapping, names, visits, favorites
//! - [`BlockCache`]: serialized objects with TTL, parent/child edges and metrics
//!
//! Neither store flushes on the request path. Register both with a
//! [`FlushScheduler`] to persist them in the background.

// Guards are held for the whole closure passed to `SnapshotDb`.
#![allow(clippy::significant_drop_tightening)]

pub mod alias;
pub mod cache;
pub mod flush;
pub mod sqlite;

pub use alias::{AliasIndex, extract_id_from_url, is_workspace_url};
pub use cache::{BlockCache, CacheMetrics, DEFAULT_EVICTION_BATCH_SIZE, DEFAULT_MAX_SIZE_BYTES};
pub use flush::{FlushScheduler, Flushable, flush_all_now};
