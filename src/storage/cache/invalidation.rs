//! Freshness checks and cascading deletion.
//!
//! Edge data is not guaranteed to be a tree: a key may have several parents
//! and malformed data may even contain cycles. All walks here use an
//! explicit queue and a visited set so they terminate regardless.

use super::{BlockCache, Direction, Outcome, neighbours, remove_key};
use crate::models::{CacheKey, ObjectKind};
use crate::{Result, current_timestamp_millis};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::collections::{HashSet, VecDeque};
use tracing::instrument;

impl BlockCache {
    /// Invalidates `key` if it is older than `freshness` or past its TTL.
    ///
    /// Returns `true` if the entry was stale and removed. Stale blocks and
    /// pages take every descendant with them; a stale page also invalidates
    /// every search or database-query listing that reaches it through parent
    /// edges. Other kinds only remove their own entry.
    #[instrument(skip(self), fields(key = %key, freshness = %freshness))]
    pub fn invalidate_if_expired(&self, key: &CacheKey, freshness: DateTime<Utc>) -> Result<bool> {
        let Some(entry) = self.load(key) else {
            self.counters.record(Outcome::NotFound);
            return Ok(false);
        };

        let stale = entry.stored_at < freshness.timestamp_millis()
            || entry.is_expired(current_timestamp_millis());
        if !stale {
            self.counters.record(Outcome::Hit);
            return Ok(false);
        }

        self.counters.record(Outcome::Expired);
        let kind = key.kind();
        let removed = self.db.write("invalidate", |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            if kind == ObjectKind::Page {
                for listing in listing_ancestors(&tx, key)? {
                    removed += remove_key(&tx, &listing)?;
                }
            }
            removed += if kind.cascades() {
                cascade(&tx, key)?
            } else {
                remove_key(&tx, key)?
            };
            tx.commit()?;
            Ok(removed)
        })?;

        tracing::debug!(removed, "Invalidated stale entry");
        Ok(true)
    }

    /// Deletes `key` and every key reachable from it through child edges.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self), fields(key = %key))]
    pub fn delete_recursive(&self, key: &CacheKey) -> Result<usize> {
        self.db.write("delete_recursive", |conn| {
            let tx = conn.transaction()?;
            let removed = cascade(&tx, key)?;
            tx.commit()?;
            Ok(removed)
        })
    }
}

/// Every key reachable from `start` (inclusive) in `direction`, breadth first.
pub(super) fn reachable(
    conn: &Connection,
    start: &CacheKey,
    direction: Direction,
) -> rusqlite::Result<Vec<CacheKey>> {
    let mut visited: HashSet<CacheKey> = HashSet::from([start.clone()]);
    let mut queue = VecDeque::from([start.clone()]);
    let mut order = Vec::new();

    while let Some(current) = queue.pop_front() {
        for next in neighbours(conn, direction, &current)? {
            if visited.insert(next.clone()) {
                queue.push_back(next);
            }
        }
        order.push(current);
    }
    Ok(order)
}

/// Removes `root` and all of its descendants.
fn cascade(conn: &Connection, root: &CacheKey) -> rusqlite::Result<usize> {
    // Collected up front: removing a key drops the edges the walk follows.
    let doomed = reachable(conn, root, Direction::Children)?;
    let mut removed = 0;
    for key in &doomed {
        removed += remove_key(conn, key)?;
    }
    Ok(removed)
}

/// Listing keys that reach `key` through parent edges, directly or not.
fn listing_ancestors(conn: &Connection, key: &CacheKey) -> rusqlite::Result<Vec<CacheKey>> {
    let ancestors = reachable(conn, key, Direction::Parents)?;
    Ok(ancestors
        .into_iter()
        .filter(|ancestor| ancestor.kind().is_listing())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentId;
    use chrono::Duration as ChronoDuration;

    fn doc(n: u8) -> DocumentId {
        DocumentId::parse(&format!("{n:02x}").repeat(16)).unwrap()
    }

    fn key(n: u8, kind: ObjectKind) -> CacheKey {
        CacheKey::document(doc(n), kind)
    }

    fn future() -> DateTime<Utc> {
        Utc::now() + ChronoDuration::hours(1)
    }

    fn past() -> DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(1)
    }

    #[test]
    fn test_cascading_delete_chain() {
        let cache = BlockCache::in_memory().unwrap();
        let a = key(1, ObjectKind::Page);
        let b = key(2, ObjectKind::Block);
        let c = key(3, ObjectKind::Block);
        cache.put(&a, "A", None, None).unwrap();
        cache.put(&b, "B", None, Some(&a)).unwrap();
        cache.put(&c, "C", None, Some(&b)).unwrap();

        assert!(cache.invalidate_if_expired(&a, future()).unwrap());

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_none());
        assert!(cache.get(&c).is_none());
        assert!(cache.children_of(&a).is_empty());
    }

    #[test]
    fn test_fresh_entry_is_kept() {
        let cache = BlockCache::in_memory().unwrap();
        let a = key(1, ObjectKind::Page);
        cache.put(&a, "A", None, None).unwrap();

        assert!(!cache.invalidate_if_expired(&a, past()).unwrap());
        assert_eq!(cache.get(&a).as_deref(), Some("A"));
    }

    #[test]
    fn test_absent_entry_counts_not_found() {
        let cache = BlockCache::in_memory().unwrap();
        assert!(!cache.invalidate_if_expired(&key(1, ObjectKind::Page), future()).unwrap());
        assert_eq!(cache.get_metrics().misses_not_found, 1);
    }

    #[test]
    fn test_database_invalidation_does_not_cascade() {
        let cache = BlockCache::in_memory().unwrap();
        let db = key(1, ObjectKind::Database);
        let row = key(2, ObjectKind::Page);
        cache.put(&db, "D", None, None).unwrap();
        cache.put(&row, "R", None, Some(&db)).unwrap();

        assert!(cache.invalidate_if_expired(&db, future()).unwrap());
        assert!(cache.get(&db).is_none());
        assert_eq!(cache.get(&row).as_deref(), Some("R"));
    }

    #[test]
    fn test_stale_page_invalidates_listings() {
        let cache = BlockCache::in_memory().unwrap();
        let search = CacheKey::search("roadmap", None, None);
        let query = CacheKey::database_query(doc(9), Some("status=done"), None);
        let page = key(1, ObjectKind::Page);
        let other = key(2, ObjectKind::Page);

        cache.put(&search, "[]", None, None).unwrap();
        cache.put(&query, "[]", None, None).unwrap();
        cache.put(&page, "P", None, Some(&search)).unwrap();
        cache.add_relationship(&query, &page).unwrap();
        cache.put(&other, "O", None, Some(&search)).unwrap();

        assert!(cache.invalidate_if_expired(&page, future()).unwrap());

        assert!(!cache.contains(&search));
        assert!(!cache.contains(&query));
        assert_eq!(cache.get(&other).as_deref(), Some("O"));
    }

    #[test]
    fn test_indirect_listing_ancestor() {
        let cache = BlockCache::in_memory().unwrap();
        let search = CacheKey::search("q", None, None);
        let outer = key(1, ObjectKind::Page);
        let block = key(2, ObjectKind::Block);
        let inner = key(3, ObjectKind::Page);

        cache.put(&search, "[]", None, None).unwrap();
        cache.put(&outer, "outer", None, Some(&search)).unwrap();
        cache.put(&block, "block", None, Some(&outer)).unwrap();
        cache.put(&inner, "inner", None, Some(&block)).unwrap();

        assert!(cache.invalidate_if_expired(&inner, future()).unwrap());
        assert!(!cache.contains(&search));
        assert!(cache.contains(&outer));
    }

    #[test]
    fn test_cascade_terminates_on_cycle() {
        let cache = BlockCache::in_memory().unwrap();
        let a = key(1, ObjectKind::Block);
        let b = key(2, ObjectKind::Block);
        cache.put(&a, "A", None, None).unwrap();
        cache.put(&b, "B", None, Some(&a)).unwrap();
        cache.add_relationship(&b, &a).unwrap();

        assert_eq!(cache.delete_recursive(&a).unwrap(), 2);
        assert_eq!(cache.entry_count(), 0);
    }

    #[test]
    fn test_cascade_keeps_other_kinds() {
        let cache = BlockCache::in_memory().unwrap();
        let page = key(1, ObjectKind::Page);
        let same_as_block = key(1, ObjectKind::Block);
        cache.put(&page, "P", None, None).unwrap();
        cache.put(&same_as_block, "B", None, None).unwrap();

        cache.delete_recursive(&page).unwrap();
        assert!(cache.contains(&same_as_block));
    }

    #[test]
    fn test_metrics_additivity() {
        let cache = BlockCache::in_memory().unwrap();
        let a = key(1, ObjectKind::Page);
        let b = key(2, ObjectKind::Block);
        cache.put(&a, "A", None, None).unwrap();

        let _ = cache.get(&a);
        let _ = cache.get(&b);
        let _ = cache.invalidate_if_expired(&a, past()).unwrap();
        let _ = cache.invalidate_if_expired(&b, future()).unwrap();
        let _ = cache.invalidate_if_expired(&a, future()).unwrap();
        let _ = cache.get(&a);

        let metrics = cache.get_metrics();
        assert_eq!(metrics.total(), 6);
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses_not_found, 3);
        assert_eq!(metrics.misses_expired, 1);
    }
}
