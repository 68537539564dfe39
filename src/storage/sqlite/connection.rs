//! Lock acquisition and pragma setup shared by the snapshot stores.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

/// Default wait for a store lock.
pub const MUTEX_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// First and longest pause between `try_lock` attempts.
const INITIAL_BACKOFF: Duration = Duration::from_micros(250);
const MAX_BACKOFF: Duration = Duration::from_millis(10);

/// Locks `mutex` without a deadline, recovering the value if it is poisoned.
///
/// Used for short bookkeeping locks that never wrap `SQLite` work.
pub fn acquire_lock<'a, T>(store: &'static str, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        recovered(store);
        poisoned.into_inner()
    })
}

/// Locks `mutex`, giving up after `timeout`.
///
/// `std::sync::Mutex` has no timed lock, so this polls `try_lock` with a
/// doubling pause capped at 10ms. A poisoned store is recovered: every
/// statement runs in its own transaction, so a panic mid-operation leaves
/// the database consistent.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] with operation `lock_<store>` on timeout.
pub fn acquire_lock_with_timeout<'a, T>(
    store: &'static str,
    mutex: &'a Mutex<T>,
    timeout: Duration,
) -> Result<MutexGuard<'a, T>> {
    let deadline = Instant::now() + timeout;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match mutex.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(TryLockError::Poisoned(poisoned)) => {
                recovered(store);
                return Ok(poisoned.into_inner());
            },
            Err(TryLockError::WouldBlock) if Instant::now() >= deadline => {
                metrics::counter!("storage_lock_timeouts_total", "store" => store).increment(1);
                tracing::error!(store, timeout_ms = timeout.as_millis(), "Store lock timed out");
                return Err(Error::OperationFailed {
                    operation: format!("lock_{store}"),
                    cause: format!("lock not acquired within {timeout:?}"),
                });
            },
            Err(TryLockError::WouldBlock) => {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            },
        }
    }
}

fn recovered(store: &'static str) {
    tracing::warn!(store, "Store lock was poisoned, recovering");
    metrics::counter!("storage_lock_poison_recoveries_total", "store" => store).increment(1);
}

/// Applies the pragmas every store connection runs with.
///
/// Edges may point at keys that are not cached, so foreign keys stay off.
/// Failures are ignored: `journal_mode` returns a row, and in-memory
/// databases report `memory` whatever is requested.
pub fn configure_connection(conn: &Connection) {
    for (pragma, value) in [
        ("journal_mode", "WAL"),
        ("synchronous", "NORMAL"),
        ("busy_timeout", "5000"),
        ("foreign_keys", "OFF"),
        ("temp_store", "MEMORY"),
    ] {
        if let Err(e) = conn.pragma_update(None, pragma, value) {
            tracing::trace!(pragma, error = %e, "Pragma not applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_concurrent_increments() {
        let mutex = Arc::new(Mutex::new(0));
        let handles: Vec<_> = (0..10)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    let mut guard =
                        acquire_lock_with_timeout("test", &mutex, MUTEX_LOCK_TIMEOUT).unwrap();
                    *guard += 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(*acquire_lock("test", &mutex), 10);
    }

    #[test]
    fn test_timeout_names_store() {
        let mutex = Mutex::new(42);
        let _held = mutex.lock().unwrap();

        let result = acquire_lock_with_timeout("block_cache", &mutex, Duration::from_millis(30));
        assert!(matches!(
            result,
            Err(Error::OperationFailed { ref operation, .. }) if operation == "lock_block_cache"
        ));
    }

    #[test]
    #[allow(clippy::panic)]
    fn test_poisoned_lock_recovers() {
        let mutex = Arc::new(Mutex::new(1));
        let poisoner = Arc::clone(&mutex);
        let _ = thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*acquire_lock_with_timeout("test", &mutex, MUTEX_LOCK_TIMEOUT).unwrap(), 1);
        assert_eq!(*acquire_lock("test", &mutex), 1);
    }

    #[test]
    fn test_configure_connection() {
        let conn = Connection::open_in_memory().unwrap();
        configure_connection(&conn);

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1);

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }
}
