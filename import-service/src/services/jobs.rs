//! Import job lifecycle tracking and progress derivation.

use crate::models::{ImportCounters, ImportJob, JobStatus};
use crate::services::metrics::{observe_job_duration, record_import_job};
use crate::stores::ImportJobStore;
use chrono::Utc;
use service_core::error::AppError;
use std::sync::Arc;
use uuid::Uuid;

/// Single writer for one job's state. The design assumes one tracker per
/// job; concurrent writers require external locking.
pub struct JobTracker {
    store: Arc<dyn ImportJobStore>,
    job: ImportJob,
}

impl std::fmt::Debug for JobTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobTracker").field("job", &self.job).finish()
    }
}

impl JobTracker {
    /// Creates a PENDING job and persists it.
    pub async fn create(
        store: Arc<dyn ImportJobStore>,
        source: &str,
        user_id: Uuid,
        wallet_id: Option<Uuid>,
    ) -> Result<Self, AppError> {
        let job = ImportJob::new(source, user_id, wallet_id);
        store.create(&job).await?;
        record_import_job(job.status.as_str());
        tracing::info!(job_id = %job.job_id, source = %job.source, "Import job created");
        Ok(Self { store, job })
    }

    /// Resumes tracking an existing job.
    pub async fn attach(store: Arc<dyn ImportJobStore>, job_id: Uuid) -> Result<Self, AppError> {
        let job = store
            .get(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("import job {} not found", job_id)))?;
        Ok(Self { store, job })
    }

    pub fn job(&self) -> &ImportJob {
        &self.job
    }

    /// Records how many items the run will process.
    pub async fn set_total(&mut self, total: u64) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.job.counters.total = total;
        self.store.update(&self.job).await
    }

    /// `PENDING -> IN_PROGRESS`.
    pub async fn begin(&mut self) -> Result<(), AppError> {
        self.transition(JobStatus::InProgress, ImportCounters::default()).await
    }

    /// Additive counter update (`current + delta`), persisted.
    pub async fn add_counts(&mut self, delta: ImportCounters) -> Result<(), AppError> {
        self.ensure_mutable()?;
        self.job.counters.add(&delta);
        self.store.update(&self.job).await
    }

    pub async fn complete(&mut self, delta: ImportCounters) -> Result<(), AppError> {
        self.transition(JobStatus::Completed, delta).await
    }

    pub async fn fail(&mut self, delta: ImportCounters) -> Result<(), AppError> {
        self.transition(JobStatus::Failed, delta).await
    }

    pub async fn cancel(&mut self, delta: ImportCounters) -> Result<(), AppError> {
        self.transition(JobStatus::Cancelled, delta).await
    }

    /// Applies a status transition. Terminal transitions stamp the end time,
    /// compute the duration exactly once, and persist status, end time,
    /// duration, and counters in a single store write.
    async fn transition(&mut self, next: JobStatus, delta: ImportCounters) -> Result<(), AppError> {
        if !transition_allowed(self.job.status, next, self.job.counters.total) {
            return Err(AppError::JobStateError(format!(
                "illegal job transition {} -> {}",
                self.job.status.as_str(),
                next.as_str()
            )));
        }

        self.job.counters.add(&delta);
        self.job.status = next;

        if next.is_terminal() {
            let ended = Utc::now();
            let duration = (ended - self.job.started_utc).num_seconds();
            self.job.ended_utc = Some(ended);
            self.job.duration_seconds = Some(duration);
            observe_job_duration(duration as f64);
        }

        self.store.update(&self.job).await?;
        record_import_job(next.as_str());
        tracing::info!(
            job_id = %self.job.job_id,
            status = next.as_str(),
            summary = %self.job.outcome_summary(),
            "Import job transitioned"
        );
        Ok(())
    }

    fn ensure_mutable(&self) -> Result<(), AppError> {
        if self.job.status.is_terminal() {
            return Err(AppError::JobStateError(format!(
                "import job {} is already {}",
                self.job.job_id,
                self.job.status.as_str()
            )));
        }
        Ok(())
    }
}

/// `PENDING -> IN_PROGRESS -> {COMPLETED | FAILED | CANCELLED}`. A job may
/// settle directly from PENDING only while no items were counted (upstream
/// failure before the first item, or an empty dataset).
fn transition_allowed(from: JobStatus, to: JobStatus, total: u64) -> bool {
    match (from, to) {
        (JobStatus::Pending, JobStatus::InProgress) => true,
        (JobStatus::Pending, JobStatus::Completed)
        | (JobStatus::Pending, JobStatus::Failed)
        | (JobStatus::Pending, JobStatus::Cancelled) => total == 0,
        (JobStatus::InProgress, JobStatus::Completed)
        | (JobStatus::InProgress, JobStatus::Failed)
        | (JobStatus::InProgress, JobStatus::Cancelled) => true,
        _ => false,
    }
}

/// Progress percentage for status reporting; pure function of job state.
/// `last_known` is returned unchanged for a job that failed or was cancelled
/// before any items were counted.
pub fn job_progress_percent(job: &ImportJob, last_known: f64) -> f64 {
    let counters = &job.counters;
    match job.status {
        JobStatus::Pending => 5.0,
        JobStatus::InProgress => {
            if counters.total == 0 {
                // Structural phase: the run exists but no items are counted yet.
                25.0
            } else {
                25.0 + 70.0 * (counters.processed() as f64 / counters.total as f64)
            }
        }
        JobStatus::Completed => 100.0,
        JobStatus::Failed | JobStatus::Cancelled => {
            if counters.total > 0 {
                (25.0 + 70.0 * (counters.processed() as f64 / counters.total as f64)).min(95.0)
            } else {
                last_known
            }
        }
    }
}
