//! Data models for blockcache.
//!
//! This module contains the core data structures:
//! - [`DocumentId`]: normalized 128-bit document identifiers
//! - [`ObjectKind`] and [`CacheKey`]: cache entry addressing
//! - [`Alias`] and [`IdentifierInput`]: integer aliases and mixed inputs
//! - [`BlockTree`]: per-turn visitation hierarchy

mod alias;
mod block_tree;
mod document_id;
mod kind;

pub use alias::{Alias, AliasRecord, IdentifierInput};
pub use block_tree::{BlockTree, PlainBlockTree};
pub use document_id::{COMPACT_LEN, DocumentId};
pub use kind::{COMPOSITE_DELIMITER, CacheKey, ObjectKind};
