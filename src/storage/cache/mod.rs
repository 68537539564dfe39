//! TTL-aware, hierarchy-aware cache of serialized objects.
//!
//! Entries are keyed by [`CacheKey`], so the same identifier can be cached
//! as a block and as a page without collision. Parent/child edges between
//! keys drive cascading invalidation and child enumeration, and a separate
//! marker set records which keys have had their complete child list
//! fetched.
//!
//! # Expiration
//!
//! An entry with a TTL is logically absent once it is older than its TTL.
//! Expired rows are purged lazily by [`BlockCache::get`]; there is no
//! background sweep. [`BlockCache::enforce_size_limit`] bounds total size
//! independently of TTL.
//!
//! # Failure semantics
//!
//! Reads absorb storage failures (logged, reported as a miss). Writes
//! return [`Error::OperationFailed`].

// Timestamps are milliseconds since the epoch; TTLs are small positive seconds.
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]

mod eviction;
mod invalidation;

use super::flush::Flushable;
use super::sqlite::{MUTEX_LOCK_TIMEOUT, SnapshotDb};
use crate::config::StorageSettings;
use crate::models::{CacheKey, DocumentId, ObjectKind};
use crate::{Error, Result, current_timestamp_millis};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::instrument;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        id TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        stored_at INTEGER NOT NULL,
        ttl_seconds INTEGER,
        PRIMARY KEY (id, kind)
    );
    CREATE INDEX IF NOT EXISTS idx_cache_entries_stored_at ON cache_entries(stored_at);
    CREATE TABLE IF NOT EXISTS cache_relationships (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        parent_key TEXT NOT NULL,
        child_key TEXT NOT NULL,
        UNIQUE (parent_key, child_key)
    );
    CREATE INDEX IF NOT EXISTS idx_cache_relationships_child ON cache_relationships(child_key);
    CREATE TABLE IF NOT EXISTS children_fetched (
        key TEXT PRIMARY KEY
    );
";

const TABLES: &[&str] = &["cache_entries", "cache_relationships", "children_fetched"];

/// Default size budget (100 MiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Default number of rows evicted per batch.
pub const DEFAULT_EVICTION_BATCH_SIZE: usize = 1000;

/// Snapshot of the cache counters.
///
/// Every [`get`](BlockCache::get) and
/// [`invalidate_if_expired`](BlockCache::invalidate_if_expired) call
/// increments exactly one counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheMetrics {
    /// Present and fresh.
    pub hits: u64,
    /// No entry under the key.
    pub misses_not_found: u64,
    /// Entry present but expired or stale.
    pub misses_expired: u64,
}

impl CacheMetrics {
    /// Total number of counted calls.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.hits + self.misses_not_found + self.misses_expired
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses_not_found: AtomicU64,
    misses_expired: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Hit,
    NotFound,
    Expired,
}

impl Counters {
    fn record(&self, outcome: Outcome) {
        match outcome {
            Outcome::Hit => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("block_cache_hits_total").increment(1);
            },
            Outcome::NotFound => {
                self.misses_not_found.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("block_cache_misses_total", "reason" => "not_found")
                    .increment(1);
            },
            Outcome::Expired => {
                self.misses_expired.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("block_cache_misses_total", "reason" => "expired").increment(1);
            },
        }
    }

    fn snapshot(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses_not_found: self.misses_not_found.load(Ordering::Relaxed),
            misses_expired: self.misses_expired.load(Ordering::Relaxed),
        }
    }
}

/// A stored row, before the expiry check.
#[derive(Debug, Clone)]
struct StoredEntry {
    content: String,
    stored_at: i64,
    ttl_seconds: Option<i64>,
}

impl StoredEntry {
    fn is_expired(&self, now_millis: i64) -> bool {
        self.ttl_seconds
            .is_some_and(|ttl| now_millis - self.stored_at > ttl.saturating_mul(1000))
    }
}

/// Durable cache of serialized objects with parent/child edges.
///
/// # Concurrency Model
///
/// One in-memory `SQLite` database behind a mutex. Each public operation
/// acquires the lock at most twice (a read, then a conditional write), and
/// writes touching several tables run in a single transaction.
pub struct BlockCache {
    db: SnapshotDb,
    counters: Counters,
    max_size_bytes: u64,
    eviction_batch_size: usize,
}

impl BlockCache {
    /// Opens the cache with default settings, loading the snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_settings(Some(path.into()), &StorageSettings::default())
    }

    /// Creates a cache with no snapshot file (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn in_memory() -> Result<Self> {
        Self::open_with_settings(None, &StorageSettings::default())
    }

    /// Opens the cache with explicit size and locking settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be initialized.
    pub fn open_with_settings(path: Option<PathBuf>, settings: &StorageSettings) -> Result<Self> {
        let lock_timeout = if settings.lock_timeout_ms == 0 {
            MUTEX_LOCK_TIMEOUT
        } else {
            settings.lock_timeout()
        };
        let db = SnapshotDb::open("block_cache", path, SCHEMA, TABLES, lock_timeout)?;
        Ok(Self {
            db,
            counters: Counters::default(),
            max_size_bytes: settings.max_cache_bytes,
            eviction_batch_size: settings.eviction_batch_size.max(1),
        })
    }

    /// Stores `content` under `key`, replacing any previous entry.
    ///
    /// With a `parent`, also records the `parent -> key` edge (idempotent).
    #[instrument(skip(self, content), fields(key = %key, bytes = content.len()))]
    pub fn put(
        &self,
        key: &CacheKey,
        content: &str,
        ttl_seconds: Option<u64>,
        parent: Option<&CacheKey>,
    ) -> Result<()> {
        let ttl = ttl_seconds.map(|ttl| i64::try_from(ttl).unwrap_or(i64::MAX));
        let stored_at = current_timestamp_millis();

        self.db.write("put", |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO cache_entries (id, kind, content, stored_at, ttl_seconds)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id, kind) DO UPDATE SET
                    content = excluded.content,
                    stored_at = excluded.stored_at,
                    ttl_seconds = excluded.ttl_seconds",
                params![key.id(), key.kind().as_str(), content, stored_at, ttl],
            )?;
            if let Some(parent) = parent {
                insert_edge(&tx, parent, key)?;
            }
            tx.commit()
        })
    }

    /// Records a `parent -> child` edge without touching either entry.
    pub fn add_relationship(&self, parent: &CacheKey, child: &CacheKey) -> Result<()> {
        self.db
            .write("add_relationship", |conn| insert_edge(conn, parent, child))
    }

    /// Returns the content under `key` if present and not expired.
    ///
    /// Expired entries are deleted.
    #[instrument(skip(self), fields(key = %key))]
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let Some(entry) = self.load(key) else {
            self.counters.record(Outcome::NotFound);
            return None;
        };

        if entry.is_expired(current_timestamp_millis()) {
            self.counters.record(Outcome::Expired);
            tracing::debug!("Cache entry expired");
            if let Err(e) = self.db.write("purge_expired", |conn| {
                let tx = conn.transaction()?;
                // Matching stored_at leaves a concurrent re-put alone.
                let unchanged = tx
                    .query_row(
                        "SELECT 1 FROM cache_entries WHERE id = ?1 AND kind = ?2 AND stored_at = ?3",
                        params![key.id(), key.kind().as_str(), entry.stored_at],
                        |_| Ok(()),
                    )
                    .optional()?
                    .is_some();
                if unchanged {
                    remove_key(&tx, key)?;
                }
                tx.commit()
            }) {
                tracing::warn!(error = %e, "Failed to purge expired entry");
            }
            return None;
        }

        self.counters.record(Outcome::Hit);
        Some(entry.content)
    }

    /// Returns `true` if an entry exists under `key`, without counting or expiring it.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.load(key).is_some()
    }

    /// Removes one entry with its edges and marker. No cascade.
    pub fn delete(&self, key: &CacheKey) -> Result<bool> {
        let removed = self.db.write("delete", |conn| {
            let tx = conn.transaction()?;
            let removed = remove_key(&tx, key)?;
            tx.commit()?;
            Ok(removed)
        })?;
        Ok(removed > 0)
    }

    /// Kinds under which `id` has a cached entry, in declaration order.
    #[must_use]
    pub fn kinds_of(&self, id: DocumentId) -> Vec<ObjectKind> {
        let mut kinds = self
            .db
            .read("kinds_of", |conn| {
                let mut stmt = conn.prepare("SELECT DISTINCT kind FROM cache_entries WHERE id = ?1")?;
                let kinds = stmt
                    .query_map(params![id.to_compact()], |row| row.get::<_, String>(0))?
                    .filter_map(std::result::Result::ok)
                    .filter_map(|kind| ObjectKind::parse(&kind))
                    .collect::<Vec<_>>();
                Ok(kinds)
            })
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Failed to look up cached kinds");
                Vec::new()
            });
        kinds.sort_unstable();
        kinds
    }

    /// Fails if `id` is cached only under kinds other than `expected`.
    ///
    /// An identifier the cache has never seen passes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ObjectTypeMismatch`] listing the kinds `id` is known as.
    pub fn verify_kind_or_raise(&self, id: DocumentId, expected: ObjectKind) -> Result<()> {
        let actual = self.kinds_of(id);
        if actual.is_empty() || actual.contains(&expected) {
            return Ok(());
        }
        tracing::debug!(document_id = %id, expected = %expected, "Object kind mismatch");
        Err(Error::ObjectTypeMismatch {
            id,
            expected,
            actual,
        })
    }

    /// Direct children of `key`, in insertion order.
    #[must_use]
    pub fn children_of(&self, key: &CacheKey) -> Vec<CacheKey> {
        self.edges("children_of", Direction::Children, key)
    }

    /// Direct parents of `key`, in insertion order.
    #[must_use]
    pub fn parents_of(&self, key: &CacheKey) -> Vec<CacheKey> {
        self.edges("parents_of", Direction::Parents, key)
    }

    /// Every key reachable from `key` through child edges, breadth first.
    ///
    /// `key` itself is not included. Terminates on cyclic edge data.
    #[must_use]
    pub fn descendants_of(&self, key: &CacheKey) -> Vec<CacheKey> {
        self.db
            .read("descendants_of", |conn| {
                let mut all = invalidation::reachable(conn, key, Direction::Children)?;
                all.retain(|k| k != key);
                Ok(all)
            })
            .unwrap_or_else(|e| {
                tracing::error!(key = %key, error = %e, "Failed to collect descendants");
                Vec::new()
            })
    }

    /// Identifiers of the direct children recorded for the block `parent`.
    #[must_use]
    pub fn get_children_ids(&self, parent: DocumentId) -> Vec<DocumentId> {
        self.children_of(&CacheKey::document(parent, ObjectKind::Block))
            .iter()
            .filter_map(CacheKey::document_id)
            .collect()
    }

    /// Marks the complete child list of `key` as fetched.
    pub fn mark_children_fetched(&self, key: &CacheKey) -> Result<()> {
        self.db.write("mark_children_fetched", |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO children_fetched (key) VALUES (?1)",
                params![key.encode()],
            )
            .map(|_| ())
        })
    }

    /// Returns `true` if the complete child list of `key` has been fetched.
    #[must_use]
    pub fn are_children_fetched(&self, key: &CacheKey) -> bool {
        self.db
            .read("are_children_fetched", |conn| {
                conn.query_row(
                    "SELECT 1 FROM children_fetched WHERE key = ?1",
                    params![key.encode()],
                    |_| Ok(()),
                )
                .optional()
                .map(|row| row.is_some())
            })
            .unwrap_or_else(|e| {
                tracing::error!(key = %key, error = %e, "Failed to read children marker");
                false
            })
    }

    /// Clears the children-fetched marker of `key`.
    pub fn clear_children_fetched(&self, key: &CacheKey) -> Result<bool> {
        let rows = self.db.write("clear_children_fetched", |conn| {
            conn.execute(
                "DELETE FROM children_fetched WHERE key = ?1",
                params![key.encode()],
            )
        })?;
        Ok(rows > 0)
    }

    /// Returns the hit and miss counters.
    #[must_use]
    pub fn get_metrics(&self) -> CacheMetrics {
        self.counters.snapshot()
    }

    fn load(&self, key: &CacheKey) -> Option<StoredEntry> {
        self.db
            .read("get", |conn| load_entry(conn, key))
            .unwrap_or_else(|e| {
                tracing::error!(key = %key, error = %e, "Cache lookup failed");
                None
            })
    }

    fn edges(&self, operation: &'static str, direction: Direction, key: &CacheKey) -> Vec<CacheKey> {
        self.db
            .read(operation, |conn| neighbours(conn, direction, key))
            .unwrap_or_else(|e| {
                tracing::error!(key = %key, error = %e, "Relationship lookup failed");
                Vec::new()
            })
    }
}

/// Edge direction for graph walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Children,
    Parents,
}

impl Direction {
    const fn query(self) -> &'static str {
        match self {
            Self::Children => {
                "SELECT child_key FROM cache_relationships WHERE parent_key = ?1 ORDER BY seq"
            },
            Self::Parents => {
                "SELECT parent_key FROM cache_relationships WHERE child_key = ?1 ORDER BY seq"
            },
        }
    }
}

fn load_entry(conn: &Connection, key: &CacheKey) -> rusqlite::Result<Option<StoredEntry>> {
    conn.query_row(
        "SELECT content, stored_at, ttl_seconds FROM cache_entries WHERE id = ?1 AND kind = ?2",
        params![key.id(), key.kind().as_str()],
        |row| {
            Ok(StoredEntry {
                content: row.get(0)?,
                stored_at: row.get(1)?,
                ttl_seconds: row.get(2)?,
            })
        },
    )
    .optional()
}

fn neighbours(
    conn: &Connection,
    direction: Direction,
    key: &CacheKey,
) -> rusqlite::Result<Vec<CacheKey>> {
    let mut stmt = conn.prepare_cached(direction.query())?;
    let keys = stmt
        .query_map(params![key.encode()], |row| row.get::<_, String>(0))?
        .filter_map(std::result::Result::ok)
        .filter_map(|encoded| CacheKey::decode(&encoded))
        .collect();
    Ok(keys)
}

fn insert_edge(conn: &Connection, parent: &CacheKey, child: &CacheKey) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO cache_relationships (parent_key, child_key) VALUES (?1, ?2)",
        params![parent.encode(), child.encode()],
    )
    .map(|_| ())
}

/// Removes the entry, edges and marker of `key`.
///
/// Parents lose their children-fetched marker since their child list is no
/// longer complete. Returns the number of entry rows deleted.
fn remove_key(conn: &Connection, key: &CacheKey) -> rusqlite::Result<usize> {
    let encoded = key.encode();
    conn.execute(
        "DELETE FROM children_fetched WHERE key IN (
            SELECT parent_key FROM cache_relationships WHERE child_key = ?1
        )",
        params![encoded],
    )?;
    conn.execute(
        "DELETE FROM cache_relationships WHERE parent_key = ?1 OR child_key = ?1",
        params![encoded],
    )?;
    conn.execute("DELETE FROM children_fetched WHERE key = ?1", params![encoded])?;
    conn.execute(
        "DELETE FROM cache_entries WHERE id = ?1 AND kind = ?2",
        params![key.id(), key.kind().as_str()],
    )
}

impl Flushable for BlockCache {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn doc(n: u8) -> DocumentId {
        DocumentId::parse(&format!("{n:02x}").repeat(16)).unwrap()
    }

    fn key(n: u8, kind: ObjectKind) -> CacheKey {
        CacheKey::document(doc(n), kind)
    }

    #[test]
    fn test_put_get_hit() {
        let cache = BlockCache::in_memory().unwrap();
        let k = key(1, ObjectKind::Page);
        cache.put(&k, "{\"a\":1}", None, None).unwrap();

        assert_eq!(cache.get(&k).as_deref(), Some("{\"a\":1}"));
        assert_eq!(cache.get_metrics().hits, 1);
    }

    #[test]
    fn test_put_overwrites() {
        let cache = BlockCache::in_memory().unwrap();
        let k = key(1, ObjectKind::Block);
        cache.put(&k, "old", None, None).unwrap();
        cache.put(&k, "new", None, None).unwrap();
        assert_eq!(cache.get(&k).as_deref(), Some("new"));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_get_missing_counts_not_found() {
        let cache = BlockCache::in_memory().unwrap();
        assert!(cache.get(&key(1, ObjectKind::Block)).is_none());
        assert_eq!(
            cache.get_metrics(),
            CacheMetrics {
                hits: 0,
                misses_not_found: 1,
                misses_expired: 0
            }
        );
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = BlockCache::in_memory().unwrap();
        let k = key(1, ObjectKind::Block);
        cache.put(&k, "content", Some(1), None).unwrap();
        assert_eq!(cache.get(&k).as_deref(), Some("content"));
        let before = cache.get_metrics();

        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get(&k).is_none());
        let after = cache.get_metrics();
        assert_eq!(after.misses_expired, before.misses_expired + 1);
        assert_eq!(after.hits, before.hits);
        assert!(!cache.contains(&k), "expired row should be purged");
    }

    #[test]
    fn test_expired_entry_takes_its_edges() {
        let cache = BlockCache::in_memory().unwrap();
        let parent = key(1, ObjectKind::Block);
        let child = key(2, ObjectKind::Block);
        let grandchild = key(3, ObjectKind::Block);
        cache.put(&parent, "p", None, None).unwrap();
        cache.put(&child, "c", Some(1), Some(&parent)).unwrap();
        cache.put(&grandchild, "g", None, Some(&child)).unwrap();
        cache.mark_children_fetched(&parent).unwrap();
        cache.mark_children_fetched(&child).unwrap();

        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get(&child).is_none());
        assert!(cache.get_children_ids(doc(1)).is_empty());
        assert!(!cache.are_children_fetched(&parent));
        assert!(!cache.are_children_fetched(&child));
        assert!(cache.children_of(&child).is_empty());
        assert_eq!(cache.get(&parent).as_deref(), Some("p"));
    }

    #[test]
    fn test_kind_disambiguation() {
        let cache = BlockCache::in_memory().unwrap();
        let as_db = key(1, ObjectKind::Database);
        let as_block = key(1, ObjectKind::Block);
        cache.put(&as_db, "X", None, None).unwrap();
        cache.put(&as_block, "Y", None, None).unwrap();

        assert_eq!(cache.get(&as_db).as_deref(), Some("X"));
        assert_eq!(cache.get(&as_block).as_deref(), Some("Y"));

        assert!(cache.delete(&as_block).unwrap());
        assert!(cache.get(&as_block).is_none());
        assert_eq!(cache.get(&as_db).as_deref(), Some("X"));
    }

    #[test]
    fn test_edges_are_idempotent_and_ordered() {
        let cache = BlockCache::in_memory().unwrap();
        let parent = key(1, ObjectKind::Block);
        cache.put(&key(3, ObjectKind::Block), "c3", None, Some(&parent)).unwrap();
        cache.put(&key(2, ObjectKind::Block), "c2", None, Some(&parent)).unwrap();
        cache.put(&key(3, ObjectKind::Block), "c3", None, Some(&parent)).unwrap();

        assert_eq!(cache.get_children_ids(doc(1)), vec![doc(3), doc(2)]);
        assert_eq!(cache.parents_of(&key(2, ObjectKind::Block)), vec![parent]);
        assert!(cache.get_children_ids(doc(9)).is_empty());
    }

    #[test]
    fn test_children_fetched_marker() {
        let cache = BlockCache::in_memory().unwrap();
        let parent = key(1, ObjectKind::Block);
        assert!(!cache.are_children_fetched(&parent));

        cache.mark_children_fetched(&parent).unwrap();
        cache.mark_children_fetched(&parent).unwrap();
        assert!(cache.are_children_fetched(&parent));

        assert!(cache.clear_children_fetched(&parent).unwrap());
        assert!(!cache.are_children_fetched(&parent));
    }

    #[test]
    fn test_delete_clears_parent_marker() {
        let cache = BlockCache::in_memory().unwrap();
        let parent = key(1, ObjectKind::Block);
        let child = key(2, ObjectKind::Block);
        cache.put(&child, "c", None, Some(&parent)).unwrap();
        cache.mark_children_fetched(&parent).unwrap();

        cache.delete(&child).unwrap();
        assert!(!cache.are_children_fetched(&parent));
        assert!(cache.children_of(&parent).is_empty());
    }

    #[test]
    fn test_verify_kind_or_raise() {
        let cache = BlockCache::in_memory().unwrap();
        cache.put(&key(1, ObjectKind::Page), "p", None, None).unwrap();
        cache.put(&key(1, ObjectKind::Block), "b", None, None).unwrap();

        let result = cache.verify_kind_or_raise(doc(1), ObjectKind::Database);
        assert!(matches!(
            result,
            Err(Error::ObjectTypeMismatch { id, expected: ObjectKind::Database, ref actual })
                if id == doc(1) && *actual == vec![ObjectKind::Block, ObjectKind::Page]
        ));

        assert!(cache.verify_kind_or_raise(doc(1), ObjectKind::Page).is_ok());
        assert!(cache.verify_kind_or_raise(doc(2), ObjectKind::Database).is_ok());
    }

    #[test]
    fn test_descendants_terminate_on_cycle() {
        let cache = BlockCache::in_memory().unwrap();
        let a = key(1, ObjectKind::Block);
        let b = key(2, ObjectKind::Block);
        cache.add_relationship(&a, &b).unwrap();
        cache.add_relationship(&b, &a).unwrap();

        assert_eq!(cache.descendants_of(&a), vec![b]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.db");
        let parent = key(1, ObjectKind::Page);
        let child = key(2, ObjectKind::Block);

        let cache = BlockCache::open(&path).unwrap();
        cache.put(&parent, "p", None, None).unwrap();
        cache.put(&child, "c", Some(3600), Some(&parent)).unwrap();
        cache.mark_children_fetched(&parent).unwrap();
        cache.flush_now().unwrap();
        drop(cache);

        let reopened = BlockCache::open(&path).unwrap();
        assert_eq!(reopened.get(&child).as_deref(), Some("c"));
        assert_eq!(reopened.children_of(&parent), vec![child]);
        assert!(reopened.are_children_fetched(&parent));
        assert_eq!(reopened.get_metrics().hits, 1, "counters restart with the process");
    }
}
