//! Cache-or-fetch services.
//!
//! The [`CacheOrchestrator`] combines the alias index and block cache with
//! fetches supplied by the caller, either as closures or through a
//! [`RemoteSource`] implementation.

mod orchestrator;
pub mod payload;
mod source;

pub use orchestrator::{AliasMap, CacheOrchestrator};
pub use source::RemoteSource;
