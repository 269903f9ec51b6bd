//! Prometheus metrics for import-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

/// Counter for import jobs reaching a status.
pub static IMPORT_JOBS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_jobs_total",
        "Total number of import job status transitions",
        &["status"]
    )
    .expect("Failed to register IMPORT_JOBS")
});

/// Counter for processed records by outcome.
pub static IMPORT_RECORDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_records_total",
        "Total number of records processed by outcome",
        &["outcome"]
    )
    .expect("Failed to register IMPORT_RECORDS")
});

/// Counter for per-item retry attempts inside batch runs.
pub static BATCH_RETRIES: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "import_batch_retries_total",
        "Total number of batch item retry attempts"
    )
    .expect("Failed to register BATCH_RETRIES")
});

/// Counter for persisted reconciliation links.
pub static RECONCILIATION_LINKS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_links_total",
        "Total number of reconciliation links created",
        &["method"]
    )
    .expect("Failed to register RECONCILIATION_LINKS")
});

/// Counter for manual-review candidates.
pub static RECONCILIATION_CANDIDATES: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_candidates_total",
        "Total number of manual-review candidates surfaced",
        &["reason"]
    )
    .expect("Failed to register RECONCILIATION_CANDIDATES")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "import_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Histogram for terminal import job duration.
pub static JOB_DURATION: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "import_job_duration_seconds",
        "Import job duration in seconds",
        vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    )
    .expect("Failed to register JOB_DURATION")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&IMPORT_JOBS);
    Lazy::force(&IMPORT_RECORDS);
    Lazy::force(&BATCH_RETRIES);
    Lazy::force(&RECONCILIATION_LINKS);
    Lazy::force(&RECONCILIATION_CANDIDATES);
    Lazy::force(&ERRORS);
    Lazy::force(&JOB_DURATION);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an import job status transition.
pub fn record_import_job(status: &str) {
    IMPORT_JOBS.with_label_values(&[status]).inc();
}

/// Record a processed record outcome.
pub fn record_import_record(outcome: &str) {
    IMPORT_RECORDS.with_label_values(&[outcome]).inc();
}

/// Record one batch item retry attempt.
pub fn record_batch_retry() {
    BATCH_RETRIES.inc();
}

/// Record a reconciliation link.
pub fn record_reconciliation_link(method: &str) {
    RECONCILIATION_LINKS.with_label_values(&[method]).inc();
}

/// Record a manual-review candidate.
pub fn record_reconciliation_candidate(reason: &str) {
    RECONCILIATION_CANDIDATES.with_label_values(&[reason]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}

/// Observe a terminal job duration.
pub fn observe_job_duration(seconds: f64) {
    JOB_DURATION.observe(seconds);
}
