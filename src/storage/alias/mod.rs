//! Durable bidirectional mapping between document identifiers and aliases.
//!
//! Each [`DocumentId`] seen by an agent gets a small integer [`Alias`] the
//! first time it is registered. Aliases are append-only: once assigned they
//! never change and are never handed to another identifier, even after
//! [`AliasIndex::delete_identifier`].
//!
//! Alongside the mapping the index keeps a display name and visit counter
//! per alias, and a set of favorite identifiers.
//!
//! # Failure semantics
//!
//! Lookups return `None` or empty results for unknown inputs and for
//! storage failures (which are logged). Mutations return
//! [`Error::OperationFailed`](crate::Error::OperationFailed) when the
//! store cannot be reached.

// SQLite hands back i64; visit counters are never negative.
#![allow(clippy::cast_sign_loss)]

mod resolve;

pub use resolve::{extract_id_from_url, is_workspace_url};

use super::flush::Flushable;
use super::sqlite::{MUTEX_LOCK_TIMEOUT, SnapshotDb};
use crate::models::{Alias, AliasRecord, DocumentId, IdentifierInput};
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;
use std::time::Duration;
use tracing::instrument;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS aliases (
        alias INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        visit_count INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS favorites (
        document_id TEXT PRIMARY KEY
    );
    CREATE INDEX IF NOT EXISTS idx_aliases_visit_count ON aliases(visit_count DESC);
";

const TABLES: &[&str] = &["aliases", "favorites"];

/// Whitespace characters ignored when deciding whether a name is empty.
const NAME_TRIM_SET: &str = "' ' || char(9) || char(10) || char(13)";

/// Bidirectional `DocumentId` to [`Alias`] index.
///
/// # Concurrency Model
///
/// All state lives in one in-memory `SQLite` database behind a mutex.
/// Every operation takes the lock once, with a bounded wait, so
/// check-then-insert sequences such as [`add_identifier`](Self::add_identifier)
/// are atomic.
pub struct AliasIndex {
    db: SnapshotDb,
}

impl AliasIndex {
    /// Opens the index, loading the snapshot at `path` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_timeout(Some(path.into()), MUTEX_LOCK_TIMEOUT)
    }

    /// Creates an index with no snapshot file (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        Self::open_with_timeout(None, MUTEX_LOCK_TIMEOUT)
    }

    /// Opens the index with an explicit lock timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_with_timeout(path: Option<PathBuf>, lock_timeout: Duration) -> Result<Self> {
        let db = SnapshotDb::open("alias_index", path, SCHEMA, TABLES, lock_timeout)?;
        Ok(Self { db })
    }

    /// Returns the alias for `id`, assigning the next one if it is new.
    ///
    /// `name` is only stored when the identifier is first registered.
    #[instrument(skip(self, name), fields(document_id = %id))]
    pub fn add_identifier(&self, id: DocumentId, name: &str) -> Result<Alias> {
        if let Some(alias) = self.get_alias(id) {
            return Ok(alias);
        }

        let (alias, inserted) = self.db.write("add_identifier", |conn| {
            insert_identifier(conn, id, name)
        })?;

        if inserted {
            metrics::counter!("alias_index_identifiers_added_total").increment(1);
            tracing::debug!(alias = %alias, "Registered identifier");
        }
        Ok(alias)
    }

    /// Registers several identifiers in one transaction, preserving order.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn add_identifiers(&self, ids: &[DocumentId]) -> Result<Vec<Alias>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let (aliases, added) = self.db.write("add_identifiers", |conn| {
            let tx = conn.transaction()?;
            let mut aliases = Vec::with_capacity(ids.len());
            let mut added = 0u64;
            for id in ids {
                let (alias, inserted) = insert_identifier(&tx, *id, "")?;
                added += u64::from(inserted);
                aliases.push(alias);
            }
            tx.commit()?;
            Ok((aliases, added))
        })?;

        metrics::counter!("alias_index_identifiers_added_total").increment(added);
        Ok(aliases)
    }

    /// Looks up the alias bound to `id`.
    #[must_use]
    pub fn get_alias(&self, id: DocumentId) -> Option<Alias> {
        self.lookup("get_alias", |conn| {
            conn.query_row(
                "SELECT alias FROM aliases WHERE document_id = ?1",
                params![id.to_compact()],
                |row| row.get::<_, u32>(0).map(Alias::new),
            )
            .optional()
        })
    }

    /// Looks up the identifier bound to `alias`.
    #[must_use]
    pub fn get_id(&self, alias: Alias) -> Option<DocumentId> {
        let raw: Option<String> = self.lookup("get_id", |conn| {
            conn.query_row(
                "SELECT document_id FROM aliases WHERE alias = ?1",
                params![alias.value()],
                |row| row.get(0),
            )
            .optional()
        });
        raw.and_then(|raw| DocumentId::parse(&raw).ok())
    }

    /// Resolves any supported input to a document identifier.
    ///
    /// Text is tried as a workspace URL, then as an identifier, then as an
    /// alias number. Returns `None` when nothing resolves.
    #[must_use]
    pub fn resolve_to_id(&self, input: impl Into<IdentifierInput>) -> Option<DocumentId> {
        match input.into() {
            IdentifierInput::Id(id) => Some(id),
            IdentifierInput::Alias(alias) => self.get_id(alias),
            IdentifierInput::Text(text) => extract_id_from_url(&text)
                .or_else(|| DocumentId::parse(text.trim()).ok())
                .or_else(|| Alias::parse(&text).and_then(|alias| self.get_id(alias))),
        }
    }

    /// Resolves any supported input to its alias.
    #[must_use]
    pub fn resolve_to_alias(&self, input: impl Into<IdentifierInput>) -> Option<Alias> {
        self.resolve_to_id(input).and_then(|id| self.get_alias(id))
    }

    /// Like [`resolve_to_id`](Self::resolve_to_id), failing on unresolvable input.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidIdentifier`] carrying the raw input.
    pub fn require_id(&self, input: impl Into<IdentifierInput>) -> Result<DocumentId> {
        let input = input.into();
        let raw = input.to_string();
        self.resolve_to_id(input)
            .ok_or(Error::InvalidIdentifier { raw })
    }

    /// Increments the visit counter of `id`.
    ///
    /// Returns `false` if the identifier is unknown.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn visit(&self, id: DocumentId) -> Result<bool> {
        let rows = self.db.write("visit", |conn| {
            conn.execute(
                "UPDATE aliases SET visit_count = visit_count + 1 WHERE document_id = ?1",
                params![id.to_compact()],
            )
        })?;

        if rows == 0 {
            tracing::debug!("Visit recorded for unknown identifier");
        }
        Ok(rows > 0)
    }

    /// Sets the display name of `alias`, overwriting any previous name.
    pub fn set_name(&self, alias: Alias, name: &str) -> Result<bool> {
        let rows = self.db.write("set_name", |conn| {
            conn.execute(
                "UPDATE aliases SET name = ?2 WHERE alias = ?1",
                params![alias.value(), name],
            )
        })?;
        Ok(rows > 0)
    }

    /// Returns the display name of `alias`, or an empty string.
    #[must_use]
    pub fn get_name(&self, alias: Alias) -> String {
        let name: Option<String> = self.lookup("get_name", |conn| {
            conn.query_row(
                "SELECT name FROM aliases WHERE alias = ?1",
                params![alias.value()],
                |row| row.get(0),
            )
            .optional()
        });
        name.unwrap_or_default()
    }

    /// Sets the name only if the current one is empty or whitespace.
    ///
    /// Returns `true` if the name was written.
    pub fn update_name_if_empty(&self, alias: Alias, name: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE aliases SET name = ?2 WHERE alias = ?1 AND TRIM(name, {NAME_TRIM_SET}) = ''"
        );
        let rows = self.db.write("update_name_if_empty", |conn| {
            conn.execute(&sql, params![alias.value(), name])
        })?;
        Ok(rows > 0)
    }

    /// Adds or removes one favorite.
    pub fn set_favorite(&self, id: DocumentId, add: bool) -> Result<()> {
        self.set_favorites(std::slice::from_ref(&id), add)
    }

    /// Adds or removes a batch of favorites.
    ///
    /// Adding an identifier the index has not seen registers it first.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub fn set_favorites(&self, ids: &[DocumentId], add: bool) -> Result<()> {
        self.db.write("set_favorites", |conn| {
            let tx = conn.transaction()?;
            for id in ids {
                if add {
                    insert_identifier(&tx, *id, "")?;
                    tx.execute(
                        "INSERT OR IGNORE INTO favorites (document_id) VALUES (?1)",
                        params![id.to_compact()],
                    )?;
                } else {
                    tx.execute(
                        "DELETE FROM favorites WHERE document_id = ?1",
                        params![id.to_compact()],
                    )?;
                }
            }
            tx.commit()
        })
    }

    /// Favorites ordered by descending visit count.
    #[must_use]
    pub fn get_favorites(&self, limit: usize) -> Vec<DocumentId> {
        self.get_favorites_with_names(limit)
            .into_iter()
            .map(|record| record.id)
            .collect()
    }

    /// Favorite records ordered by descending visit count.
    #[must_use]
    pub fn get_favorites_with_names(&self, limit: usize) -> Vec<AliasRecord> {
        self.records(
            "get_favorites",
            "SELECT a.alias, a.document_id, a.name, a.visit_count
             FROM aliases a JOIN favorites f ON f.document_id = a.document_id
             ORDER BY a.visit_count DESC, a.alias ASC LIMIT ?1",
            limit,
        )
    }

    /// Most visited identifiers, favorite or not.
    #[must_use]
    pub fn most_visited(&self, limit: usize) -> Vec<AliasRecord> {
        self.records(
            "most_visited",
            "SELECT alias, document_id, name, visit_count FROM aliases
             ORDER BY visit_count DESC, alias ASC LIMIT ?1",
            limit,
        )
    }

    /// Removes an identifier and its favorite flag.
    ///
    /// The alias number is retired, not recycled.
    #[instrument(skip(self), fields(document_id = %id))]
    pub fn delete_identifier(&self, id: DocumentId) -> Result<bool> {
        let rows = self.db.write("delete_identifier", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM favorites WHERE document_id = ?1",
                params![id.to_compact()],
            )?;
            let rows = tx.execute(
                "DELETE FROM aliases WHERE document_id = ?1",
                params![id.to_compact()],
            )?;
            tx.commit()?;
            Ok(rows)
        })?;
        Ok(rows > 0)
    }

    /// Number of known identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        let count: Option<i64> = self.lookup("count", |conn| {
            conn.query_row("SELECT COUNT(*) FROM aliases", [], |row| row.get(0))
                .map(Some)
        });
        count.map_or(0, |c| usize::try_from(c).unwrap_or(0))
    }

    /// Returns `true` if no identifier is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs a lookup, logging and absorbing storage failures.
    fn lookup<T, F>(&self, operation: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<Option<T>>,
    {
        self.db.read(operation, f).unwrap_or_else(|e| {
            tracing::error!(operation, error = %e, "Alias index lookup failed");
            None
        })
    }

    fn records(&self, operation: &'static str, sql: &str, limit: usize) -> Vec<AliasRecord> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.lookup(operation, |conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params![limit], parse_record_row)?
                .filter_map(std::result::Result::ok)
                .flatten()
                .collect::<Vec<_>>();
            Ok(Some(rows))
        });
        rows.unwrap_or_default()
    }
}

/// Returns the alias for `id`, inserting it if missing, and whether it was new.
fn insert_identifier(
    conn: &Connection,
    id: DocumentId,
    name: &str,
) -> rusqlite::Result<(Alias, bool)> {
    let compact = id.to_compact();
    let existing: Option<u32> = conn
        .query_row(
            "SELECT alias FROM aliases WHERE document_id = ?1",
            params![compact],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(alias) = existing {
        return Ok((Alias::new(alias), false));
    }

    // Only a fresh identifier may draw from the AUTOINCREMENT sequence.
    let alias: u32 = conn.query_row(
        "INSERT INTO aliases (document_id, name) VALUES (?1, ?2) RETURNING alias",
        params![compact, name],
        |row| row.get(0),
    )?;
    Ok((Alias::new(alias), true))
}

/// Parses an alias row; rows with a corrupted identifier are skipped.
fn parse_record_row(row: &Row<'_>) -> rusqlite::Result<Option<AliasRecord>> {
    let alias: u32 = row.get(0)?;
    let raw: String = row.get(1)?;
    let name: String = row.get(2)?;
    let visit_count: i64 = row.get(3)?;

    Ok(DocumentId::parse(&raw).ok().map(|id| AliasRecord {
        alias: Alias::new(alias),
        id,
        name,
        visit_count: visit_count.max(0) as u64,
    }))
}

impl Flushable for AliasIndex {
    fn name(&self) -> &'static str {
        self.db.name()
    }

    fn flush_if_dirty(&self, min_interval: Duration) -> Result<bool> {
        self.db.flush_if_dirty(min_interval)
    }

    fn flush_now(&self) -> Result<()> {
        self.db.flush_now()
    }
}
