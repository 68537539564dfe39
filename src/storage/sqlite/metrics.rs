//! Per-operation counters and latency histograms for the snapshot stores.

use std::time::Instant;

/// Outcome label for a store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpStatus {
    /// The statement completed.
    Success,
    /// `SQLite` reported an error.
    Error,
}

impl OpStatus {
    /// Status for an operation result.
    pub const fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
        if result.is_ok() { Self::Success } else { Self::Error }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Records `storage_operations_total` and `storage_operation_duration_ms`
/// labelled by store, operation and status.
pub fn record_operation_metrics(
    store: &'static str,
    operation: &'static str,
    start: Instant,
    status: OpStatus,
) {
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let labels = [
        ("store", store),
        ("operation", operation),
        ("status", status.as_str()),
    ];
    metrics::counter!("storage_operations_total", &labels).increment(1);
    metrics::histogram!("storage_operation_duration_ms", &labels).record(elapsed_ms);

    if status == OpStatus::Error {
        tracing::debug!(store, operation, elapsed_ms, "Store operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_of_result() {
        assert_eq!(OpStatus::of(&Ok::<(), ()>(())), OpStatus::Success);
        assert_eq!(OpStatus::of(&Err::<(), _>("boom")), OpStatus::Error);
    }

    #[test]
    fn test_record_without_recorder_is_noop() {
        let start = Instant::now();
        record_operation_metrics("block_cache", "get", start, OpStatus::Success);
        record_operation_metrics("alias_index", "add_identifier", start, OpStatus::Error);
    }
}
