//! Services module for import-service.

pub mod batch;
pub mod fingerprint;
pub mod importer;
pub mod jobs;
pub mod matching;
pub mod metrics;
pub mod schedule;

pub use batch::{BatchEvent, BatchExecutor, BatchOptions, BatchOutcome, BatchSummary};
pub use fingerprint::record_fingerprint;
pub use importer::{ImportOutcome, ImportService};
pub use jobs::{job_progress_percent, JobTracker};
pub use matching::{MatchScorer, ReconciliationEngine, RuleScorer};
pub use metrics::{
    get_metrics, init_metrics, record_batch_retry, record_error, record_import_job,
    record_import_record, record_reconciliation_candidate, record_reconciliation_link,
};
pub use schedule::{build_installments, expand_sale, split_amount};
