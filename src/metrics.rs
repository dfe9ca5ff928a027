//! Client-side metrics for swiftkit.
//!
//! Emits through the `metrics` facade only.  Nothing is recorded unless
//! the host application installs a recorder (for example
//! `metrics-exporter-prometheus`), so the library never owns global
//! state.

use std::time::Duration;

use http::StatusCode;
use metrics::{counter, describe_counter, describe_histogram, histogram};

use crate::status::Operation;

// -- Metric name constants ----------------------------------------------------

/// Total requests issued (counter). Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "swiftkit_requests_total";

/// Request duration in seconds (histogram). Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "swiftkit_request_duration_seconds";

/// Total bytes uploaded in object bodies (counter).
pub const BYTES_UPLOADED_TOTAL: &str = "swiftkit_bytes_uploaded_total";

/// Uploads rejected because the returned ETag did not match (counter).
pub const CHECKSUM_MISMATCHES_TOTAL: &str = "swiftkit_checksum_mismatches_total";

/// Register metric descriptions with the installed recorder.
pub fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total Swift requests by operation and status class");
    describe_histogram!(REQUEST_DURATION_SECONDS, "Swift request duration in seconds");
    describe_counter!(BYTES_UPLOADED_TOTAL, "Total object bytes uploaded");
    describe_counter!(
        CHECKSUM_MISMATCHES_TOTAL,
        "Uploads whose returned ETag did not match the sent data"
    );
}

/// Record one completed exchange.  `status` is `None` when the transport
/// failed before a response arrived.
pub fn record_request(operation: Operation, status: Option<StatusCode>, elapsed: Duration) {
    counter!(REQUESTS_TOTAL, "operation" => operation.label(), "status" => status_class(status))
        .increment(1);
    histogram!(REQUEST_DURATION_SECONDS, "operation" => operation.label())
        .record(elapsed.as_secs_f64());
}

pub fn record_upload(bytes: u64) {
    counter!(BYTES_UPLOADED_TOTAL).increment(bytes);
}

pub fn record_checksum_mismatch() {
    counter!(CHECKSUM_MISMATCHES_TOTAL).increment(1);
}

// -- Label normalization ------------------------------------------------------

/// Collapse a status code into a low-cardinality label.
///
/// Examples:
/// - `200` -> `2xx`
/// - `404` -> `4xx`
/// - transport failure -> `error`
fn status_class(status: Option<StatusCode>) -> &'static str {
    match status.map(|s| s.as_u16() / 100) {
        Some(1) => "1xx",
        Some(2) => "2xx",
        Some(3) => "3xx",
        Some(4) => "4xx",
        Some(5) => "5xx",
        Some(_) => "other",
        None => "error",
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_class_success() {
        assert_eq!(status_class(Some(StatusCode::OK)), "2xx");
        assert_eq!(status_class(Some(StatusCode::NO_CONTENT)), "2xx");
    }

    #[test]
    fn test_status_class_errors() {
        assert_eq!(status_class(Some(StatusCode::NOT_FOUND)), "4xx");
        assert_eq!(status_class(Some(StatusCode::SERVICE_UNAVAILABLE)), "5xx");
        assert_eq!(status_class(Some(StatusCode::NOT_MODIFIED)), "3xx");
    }

    #[test]
    fn test_status_class_transport_failure() {
        assert_eq!(status_class(None), "error");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        describe_metrics();
        record_request(Operation::ObjectHead, Some(StatusCode::OK), Duration::from_millis(3));
        record_upload(42);
        record_checksum_mismatch();
    }
}
