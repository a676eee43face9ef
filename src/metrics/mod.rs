//! Metrics module
//!
//! Prometheus metrics for the storage engine. The collectors live in the
//! default registry so an embedding service exposes them with its own
//! `/metrics` endpoint.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    HistogramVec,
};

/// Bucket label for uploads that failed before a bucket was resolved
pub const UNRESOLVED_BUCKET: &str = "unresolved";

lazy_static! {
    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_storage_uploads_total",
        "Total number of handled files",
        &["bucket", "status"]
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "mizuchi_storage_upload_bytes_total",
        "Total verified bytes stored"
    ).unwrap();

    pub static ref UPLOAD_DURATION: HistogramVec = register_histogram_vec!(
        "mizuchi_storage_upload_duration_seconds",
        "Time from parameter resolution to verified size in seconds",
        &["bucket"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0]
    ).unwrap();

    // Removal metrics
    pub static ref REMOVALS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_storage_removals_total",
        "Total object removals",
        &["status"]
    ).unwrap();

    // Sniffing metrics
    pub static ref SNIFFED_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_storage_sniffed_total",
        "Content types detected by stream sniffing",
        &["mime"]
    ).unwrap();

    // Error metrics
    pub static ref ERRORS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_storage_errors_total",
        "Total errors",
        &["type"]
    ).unwrap();
}

/// Record a successful upload
pub fn record_upload_success(bucket: &str, bytes: u64) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "success"]).inc();
    UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
}

/// Record a failed upload
///
/// Use [`UNRESOLVED_BUCKET`] when the failure happened before the bucket was
/// resolved.
pub fn record_upload_failure(bucket: &str, error_type: &str) {
    UPLOADS_TOTAL.with_label_values(&[bucket, "failure"]).inc();
    record_error(error_type);
}

/// Record upload duration
pub fn record_upload_duration(bucket: &str, duration_secs: f64) {
    UPLOAD_DURATION
        .with_label_values(&[bucket])
        .observe(duration_secs);
}

/// Record a removal attempt
pub fn record_removal(success: bool) {
    let status = if success { "success" } else { "failure" };
    REMOVALS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a sniffed content type
pub fn record_sniffed_content_type(mime: &str) {
    SNIFFED_TOTAL.with_label_values(&[mime]).inc();
}

/// Record an error
pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_upload_success() {
        let before = UPLOADS_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        record_upload_success("metrics-test", 1024);
        let after = UPLOADS_TOTAL
            .with_label_values(&["metrics-test", "success"])
            .get();
        assert_eq!(after - before, 1.0);
    }

    #[test]
    fn test_record_upload_failure() {
        record_upload_failure("metrics-test", "write");
        assert!(ERRORS_TOTAL.with_label_values(&["write"]).get() >= 1.0);
    }

    #[test]
    fn test_record_sniffed_content_type() {
        record_sniffed_content_type("image/png");
        assert!(SNIFFED_TOTAL.with_label_values(&["image/png"]).get() >= 1.0);
    }

    #[test]
    fn test_record_removal() {
        record_removal(true);
        record_removal(false);
        // Just verify it doesn't panic
    }
}
