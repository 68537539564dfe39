//! Object kinds and cache keys.

use super::DocumentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delimiter joining the parts of a listing key.
pub const COMPOSITE_DELIMITER: char = '|';

/// What a cached object represents.
///
/// The same [`DocumentId`] may be cached under more than one kind (a page is
/// also a block in the remote workspace), so every cache entry and edge is
/// keyed by the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    /// A content block.
    Block,
    /// A page.
    Page,
    /// A database.
    Database,
    /// One page of workspace search results.
    SearchResults,
    /// One page of database query results.
    DatabaseQueryResults,
}

impl ObjectKind {
    /// Returns all kinds.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Block,
            Self::Page,
            Self::Database,
            Self::SearchResults,
            Self::DatabaseQueryResults,
        ]
    }

    /// Returns the kind as stored in the cache tables.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Page => "page",
            Self::Database => "database",
            Self::SearchResults => "search_results",
            Self::DatabaseQueryResults => "database_query_results",
        }
    }

    /// Parses a kind from its stored form or from a remote `object` field.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "block" => Some(Self::Block),
            "page" => Some(Self::Page),
            "database" => Some(Self::Database),
            "search_results" => Some(Self::SearchResults),
            "database_query_results" => Some(Self::DatabaseQueryResults),
            _ => None,
        }
    }

    /// Returns `true` for list-shaped kinds addressed by a composite key.
    #[must_use]
    pub const fn is_listing(&self) -> bool {
        matches!(self, Self::SearchResults | Self::DatabaseQueryResults)
    }

    /// Returns `true` for kinds whose invalidation cascades to descendants.
    #[must_use]
    pub const fn cascades(&self) -> bool {
        matches!(self, Self::Block | Self::Page)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown object kind: {s}"))
    }
}

/// Address of one cache entry.
///
/// Document kinds use the compact [`DocumentId`]; listing kinds use a
/// composite of the query, filter and cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    id: String,
    kind: ObjectKind,
}

impl CacheKey {
    /// Key for a document of the given kind.
    #[must_use]
    pub fn document(id: DocumentId, kind: ObjectKind) -> Self {
        Self {
            id: id.to_compact(),
            kind,
        }
    }

    /// Key for one page of workspace search results.
    #[must_use]
    pub fn search(query: &str, filter: Option<&str>, cursor: Option<DocumentId>) -> Self {
        Self {
            id: composite(query, filter, cursor),
            kind: ObjectKind::SearchResults,
        }
    }

    /// Key for one page of database query results.
    #[must_use]
    pub fn database_query(
        database: DocumentId,
        filter: Option<&str>,
        cursor: Option<DocumentId>,
    ) -> Self {
        Self {
            id: composite(&database.to_compact(), filter, cursor),
            kind: ObjectKind::DatabaseQueryResults,
        }
    }

    /// Rebuilds a key from its stored columns.
    pub(crate) fn from_parts(id: impl Into<String>, kind: ObjectKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// The identifier column (compact id or composite string).
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The object kind.
    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    /// The document identifier, for non-listing kinds.
    #[must_use]
    pub fn document_id(&self) -> Option<DocumentId> {
        if self.kind.is_listing() {
            return None;
        }
        DocumentId::parse(&self.id).ok()
    }

    /// Single-string form used by the relationship and marker tables.
    #[must_use]
    pub fn encode(&self) -> String {
        format!("{}:{}", self.kind.as_str(), self.id)
    }

    /// Parses the single-string form produced by [`encode`](Self::encode).
    #[must_use]
    pub fn decode(encoded: &str) -> Option<Self> {
        let (kind, id) = encoded.split_once(':')?;
        Some(Self::from_parts(id, ObjectKind::parse(kind)?))
    }
}

/// Joins listing parameters. Free-text parts are escaped so a delimiter
/// inside the query or filter cannot shift the field boundaries.
fn composite(head: &str, filter: Option<&str>, cursor: Option<DocumentId>) -> String {
    let cursor = cursor.map(|c| c.to_compact()).unwrap_or_default();
    format!(
        "{}{COMPOSITE_DELIMITER}{}{COMPOSITE_DELIMITER}{cursor}",
        escape_part(head),
        escape_part(filter.unwrap_or_default())
    )
}

fn escape_part(part: &str) -> String {
    let mut escaped = String::with_capacity(part.len());
    for c in part.chars() {
        if c == '\\' || c == COMPOSITE_DELIMITER {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        for kind in ObjectKind::all() {
            assert_eq!(ObjectKind::parse(kind.as_str()), Some(*kind));
        }
        assert_eq!(ObjectKind::parse("comment"), None);
    }

    #[test]
    fn test_kind_classification() {
        assert!(ObjectKind::SearchResults.is_listing());
        assert!(ObjectKind::DatabaseQueryResults.is_listing());
        assert!(!ObjectKind::Page.is_listing());
        assert!(ObjectKind::Page.cascades());
        assert!(ObjectKind::Block.cascades());
        assert!(!ObjectKind::Database.cascades());
    }

    #[test]
    fn test_same_id_different_kinds_are_distinct() {
        let id = DocumentId::new_random();
        let block = CacheKey::document(id, ObjectKind::Block);
        let page = CacheKey::document(id, ObjectKind::Page);
        assert_ne!(block, page);
        assert_ne!(block.encode(), page.encode());
        assert_eq!(block.document_id(), Some(id));
    }

    #[test]
    fn test_encode_decode() {
        let key = CacheKey::search("roadmap: q3", Some("{\"value\":\"page\"}"), None);
        let decoded = CacheKey::decode(&key.encode()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.document_id(), None);
        assert!(CacheKey::decode("nonsense").is_none());
        assert!(CacheKey::decode("comment:abc").is_none());
    }

    #[test]
    fn test_composite_keys() {
        let cursor = DocumentId::parse("0123456789abcdef0123456789abcdef").unwrap();
        let key = CacheKey::search("roadmap", None, Some(cursor));
        assert_eq!(key.id(), "roadmap||0123456789abcdef0123456789abcdef");

        let db = DocumentId::parse("fedcba9876543210fedcba9876543210").unwrap();
        let key = CacheKey::database_query(db, Some("status=done"), None);
        assert_eq!(key.id(), "fedcba9876543210fedcba9876543210|status=done|");
        assert_eq!(key.kind(), ObjectKind::DatabaseQueryResults);
    }

    #[test]
    fn test_delimiter_in_query_does_not_collide() {
        let joined = CacheKey::search("a|b", None, None);
        let split = CacheKey::search("a", Some("b"), None);
        assert_ne!(joined, split);
        assert_eq!(joined.id(), "a\\|b||");

        let slash = CacheKey::search("a\\", Some("|b"), None);
        let pipe = CacheKey::search("a\\|", Some("b"), None);
        assert_ne!(slash, pipe);
        assert_eq!(CacheKey::decode(&joined.encode()), Some(joined));
    }
}
