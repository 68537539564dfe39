//! The remote workspace API as consumed by the orchestrator.

use crate::models::DocumentId;
use serde_json::Value;
use std::fmt::Display;
use std::future::Future;

/// Raw object fetches against the remote workspace.
///
/// Payloads are returned as received; the orchestrator takes care of
/// aliasing and caching. Implementations own retries and timeouts.
pub trait RemoteSource: Send + Sync {
    /// Error reported by failed fetches. Logged, never propagated.
    type Error: Display + Send;

    /// Fetches a page object.
    fn fetch_page(&self, id: DocumentId) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Fetches a database object.
    fn fetch_database(
        &self,
        id: DocumentId,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Fetches a single block.
    fn fetch_block(&self, id: DocumentId)
    -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Fetches one page of a block's children.
    fn fetch_block_children(
        &self,
        id: DocumentId,
        cursor: Option<DocumentId>,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Searches the workspace.
    fn search(
        &self,
        query: &str,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;

    /// Queries a database.
    fn query_database(
        &self,
        id: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> impl Future<Output = Result<Value, Self::Error>> + Send;
}
