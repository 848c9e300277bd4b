//! Shared metrics recording for storage backends.

use crate::Result;
use std::time::Instant;

/// Records `storage_operations_total` and `storage_operation_duration_ms`
/// for one completed operation.
pub fn record_operation_metrics(
    backend: &'static str,
    operation: &'static str,
    start: Instant,
    status: &'static str,
) {
    metrics::counter!(
        "storage_operations_total",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "backend" => backend,
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}

/// Runs `call` and records its latency and outcome.
///
/// # Errors
///
/// Returns whatever `call` returns.
pub fn timed<T>(
    backend: &'static str,
    operation: &'static str,
    call: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let start = Instant::now();
    let result = call();
    let status = if result.is_ok() { "success" } else { "error" };
    record_operation_metrics(backend, operation, start, status);
    result
}
