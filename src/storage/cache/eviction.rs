//! Size-bounded eviction, oldest entries first.
//!
//! Runs only when called; TTL plays no part in choosing victims.

use super::{BlockCache, remove_key};
use crate::Result;
use crate::models::{CacheKey, ObjectKind};
use rusqlite::{Connection, params};
use tracing::instrument;

/// Byte size of all entries: key columns plus content.
const SIZE_SQL: &str = "SELECT COALESCE(SUM(
        length(CAST(id AS BLOB)) + length(CAST(kind AS BLOB)) + length(CAST(content AS BLOB))
    ), 0) FROM cache_entries";

impl BlockCache {
    /// Number of cached entries, expired ones included.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.db
            .read("entry_count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map_or(0, |count| usize::try_from(count).unwrap_or(0))
    }

    /// Approximate storage used by entries, in bytes.
    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.db
            .read("size_bytes", total_size)
            .map_or(0, |size| u64::try_from(size).unwrap_or(0))
    }

    /// Configured size budget in bytes.
    #[must_use]
    pub const fn max_size_bytes(&self) -> u64 {
        self.max_size_bytes
    }

    /// Evicts the oldest entries in batches until the cache fits its budget.
    ///
    /// Returns the number of entries evicted.
    #[instrument(skip(self), fields(max_bytes = self.max_size_bytes))]
    pub fn enforce_size_limit(&self) -> Result<usize> {
        let budget = i64::try_from(self.max_size_bytes).unwrap_or(i64::MAX);
        let batch = i64::try_from(self.eviction_batch_size).unwrap_or(i64::MAX);
        let mut evicted = 0;

        while self.db.read("size_bytes", total_size)? > budget {
            let removed = self.db.write("evict_batch", |conn| {
                let tx = conn.transaction()?;
                let victims = oldest(&tx, batch)?;
                for key in &victims {
                    remove_key(&tx, key)?;
                }
                tx.commit()?;
                Ok(victims.len())
            })?;

            if removed == 0 {
                break;
            }
            evicted += removed;
        }

        if evicted > 0 {
            metrics::counter!("block_cache_evictions_total")
                .increment(u64::try_from(evicted).unwrap_or(u64::MAX));
            tracing::info!(evicted, "Evicted cache entries over size budget");
        }
        Ok(evicted)
    }
}

fn total_size(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(SIZE_SQL, [], |row| row.get(0))
}

fn oldest(conn: &Connection, limit: i64) -> rusqlite::Result<Vec<CacheKey>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, kind FROM cache_entries ORDER BY stored_at ASC, rowid ASC LIMIT ?1",
    )?;
    let keys = stmt
        .query_map(params![limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .filter_map(std::result::Result::ok)
        .filter_map(|(id, kind)| Some(CacheKey::from_parts(id, ObjectKind::parse(&kind)?)))
        .collect();
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageSettings;
    use crate::models::DocumentId;

    fn key(n: u8) -> CacheKey {
        CacheKey::document(
            DocumentId::parse(&format!("{n:02x}").repeat(16)).unwrap(),
            ObjectKind::Block,
        )
    }

    fn small_cache(max_cache_bytes: u64, eviction_batch_size: usize) -> BlockCache {
        let settings = StorageSettings {
            max_cache_bytes,
            eviction_batch_size,
            ..StorageSettings::default()
        };
        BlockCache::open_with_settings(None, &settings).unwrap()
    }

    #[test]
    fn test_size_accounting() {
        let cache = small_cache(1024, 10);
        assert_eq!(cache.size_bytes(), 0);
        cache.put(&key(1), "abcd", None, None).unwrap();
        // 32 id + 5 kind + 4 content
        assert_eq!(cache.size_bytes(), 41);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_evicts_oldest_first() {
        let cache = small_cache(100, 1);
        for n in 1..=4 {
            cache.put(&key(n), "0123456789", None, None).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        // Each entry is 47 bytes; two fit.
        let evicted = cache.enforce_size_limit().unwrap();

        assert_eq!(evicted, 2);
        assert!(!cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert!(cache.contains(&key(4)));
        assert!(cache.size_bytes() <= 100);
    }

    #[test]
    fn test_under_budget_is_noop() {
        let cache = small_cache(1024, 10);
        cache.put(&key(1), "x", None, None).unwrap();
        assert_eq!(cache.enforce_size_limit().unwrap(), 0);
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_eviction_clears_parent_marker() {
        let cache = small_cache(60, 1);
        let parent = key(1);
        cache.put(&key(2), "0123456789", None, Some(&parent)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        cache.put(&key(3), "0123456789", None, Some(&parent)).unwrap();
        cache.mark_children_fetched(&parent).unwrap();

        assert_eq!(cache.enforce_size_limit().unwrap(), 1);
        assert!(!cache.are_children_fetched(&parent));
        assert_eq!(cache.children_of(&parent), vec![key(3)]);
    }
}
