//! Import orchestration: fetch, validate, dedupe, persist, track, notify.

use crate::config::ImportConfig;
use crate::models::{
    DateWindow, ExternalRecord, ImportCounters, ImportJob, JobFilter, LedgerTransaction,
    ReconcileOutcome, SaleRecord,
};
use crate::services::batch::{BatchCallback, BatchEvent, BatchExecutor, BatchSummary};
use crate::services::jobs::JobTracker;
use crate::services::matching::{MatchScorer, ReconciliationEngine, RuleScorer};
use crate::services::metrics::{record_error, record_import_record};
use crate::services::schedule::{build_installments, expand_sale};
use crate::stores::{
    ExternalSalesSource, FingerprintStore, ImportJobStore, LedgerStore, NotificationSink,
};
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Per-record classification produced by one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    Imported,
    Skipped,
}

/// Imported/skipped tallies owned by one run, flushed additively through the
/// job tracker on batch boundaries.
#[derive(Default)]
struct RunTallies {
    imported: AtomicU64,
    skipped: AtomicU64,
}

impl RunTallies {
    fn take_delta(&self) -> ImportCounters {
        ImportCounters {
            total: 0,
            imported: self.imported.swap(0, Ordering::SeqCst),
            skipped: self.skipped.swap(0, Ordering::SeqCst),
            error: 0,
        }
    }
}

/// Ties the batch executor, deduper, schedule expander, job tracker, and
/// reconciliation engine to the external collaborators.
pub struct ImportService {
    source: Arc<dyn ExternalSalesSource>,
    ledger: Arc<dyn LedgerStore>,
    jobs: Arc<dyn ImportJobStore>,
    notifier: Arc<dyn NotificationSink>,
    fingerprints: Arc<dyn FingerprintStore>,
    executor: BatchExecutor,
    engine: ReconciliationEngine,
}

impl ImportService {
    pub fn new(
        config: ImportConfig,
        source: Arc<dyn ExternalSalesSource>,
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn ImportJobStore>,
        notifier: Arc<dyn NotificationSink>,
        fingerprints: Arc<dyn FingerprintStore>,
    ) -> Self {
        let scorer: Arc<dyn MatchScorer> = Arc::new(RuleScorer::new(&config.matching));
        Self::with_scorer(config, source, ledger, jobs, notifier, fingerprints, scorer)
    }

    /// Builds the service around a caller-provided scorer.
    #[allow(clippy::too_many_arguments)]
    pub fn with_scorer(
        config: ImportConfig,
        source: Arc<dyn ExternalSalesSource>,
        ledger: Arc<dyn LedgerStore>,
        jobs: Arc<dyn ImportJobStore>,
        notifier: Arc<dyn NotificationSink>,
        fingerprints: Arc<dyn FingerprintStore>,
        scorer: Arc<dyn MatchScorer>,
    ) -> Self {
        let engine = ReconciliationEngine::new(config.matching.clone(), ledger.clone(), scorer);
        let executor = BatchExecutor::new(config.batch.clone());
        Self { source, ledger, jobs, notifier, fingerprints, executor, engine }
    }

    /// Creates a PENDING job for a later `run_import` call.
    pub async fn create_import_job(
        &self,
        source: &str,
        user_id: Uuid,
        wallet_id: Option<Uuid>,
    ) -> Result<Uuid, AppError> {
        let tracker = JobTracker::create(self.jobs.clone(), source, user_id, wallet_id).await?;
        Ok(tracker.job().job_id)
    }

    /// Fetches the window from the external source and imports every record
    /// exactly once, driving the job through its lifecycle. Returns the
    /// terminal job. A source failure flips the job to FAILED (partial
    /// counters preserved) and propagates.
    pub async fn run_import(
        &self,
        job_id: Uuid,
        window: DateWindow,
        events: Option<UnboundedSender<BatchEvent>>,
    ) -> Result<ImportJob, AppError> {
        let tracker = JobTracker::attach(self.jobs.clone(), job_id).await?;
        let user_id = tracker.job().user_id;
        let wallet_id = tracker.job().wallet_id;
        let tracker = Arc::new(Mutex::new(tracker));

        let records = match self.fetch_all(user_id, window).await {
            Ok(records) => records,
            Err(error) => {
                record_error("upstream");
                self.settle_failed(&tracker).await;
                return Err(error);
            }
        };

        {
            let mut guard = tracker.lock().await;
            guard.set_total(records.len() as u64).await?;
            if records.is_empty() {
                guard.complete(ImportCounters::default()).await?;
                let job = guard.job().clone();
                drop(guard);
                self.notify_outcome(&job).await;
                return Ok(job);
            }
            guard.begin().await?;
        }

        let tallies = Arc::new(RunTallies::default());

        let process = {
            let ledger = self.ledger.clone();
            let fingerprints = self.fingerprints.clone();
            let tallies = tallies.clone();
            move |record: ExternalRecord| {
                let ledger = ledger.clone();
                let fingerprints = fingerprints.clone();
                let tallies = tallies.clone();
                async move {
                    import_record(ledger, fingerprints, tallies, user_id, wallet_id, record).await
                }
            }
        };

        let on_batch: BatchCallback = {
            let tracker = tracker.clone();
            let tallies = tallies.clone();
            Box::new(move |summary: BatchSummary| {
                let tracker = tracker.clone();
                let tallies = tallies.clone();
                Box::pin(async move {
                    let mut delta = tallies.take_delta();
                    delta.skipped += summary.skipped as u64;
                    delta.error += summary.failed as u64;
                    if delta.is_empty() {
                        return;
                    }
                    let mut guard = tracker.lock().await;
                    if let Err(error) = guard.add_counts(delta).await {
                        tracing::warn!(
                            batch = summary.batch,
                            error = %error,
                            "Failed to flush batch counters"
                        );
                    }
                })
            })
        };

        let outcome = self.executor.run(records, process, events, Some(on_batch)).await?;

        let mut guard = tracker.lock().await;
        let residue = tallies.take_delta();
        if outcome.cancelled {
            guard.cancel(residue).await?;
        } else {
            guard.complete(residue).await?;
        }
        let job = guard.job().clone();
        drop(guard);

        self.notify_outcome(&job).await;
        Ok(job)
    }

    /// Requests cooperative cancellation of the in-flight batch run.
    pub fn cancel(&self) {
        self.executor.cancel();
    }

    /// Links unmatched ledger transactions to open installments in the
    /// window.
    pub async fn reconcile_window(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<ReconcileOutcome, AppError> {
        self.engine.reconcile(user_id, window, wallet_id).await
    }

    /// Job listing for status screens.
    pub async fn jobs_for_user(
        &self,
        user_id: Uuid,
        filter: JobFilter,
    ) -> Result<Vec<ImportJob>, AppError> {
        self.jobs.list_for_user(user_id, filter).await
    }

    async fn fetch_all(
        &self,
        user_id: Uuid,
        window: DateWindow,
    ) -> Result<Vec<ExternalRecord>, AppError> {
        let mut records = Vec::new();
        let mut page = 0u32;
        loop {
            let fetched = self.source.fetch_page(user_id, window, page).await?;
            records.extend(fetched.records);
            match fetched.next_page {
                Some(next) => page = next,
                None => break,
            }
        }
        tracing::info!(
            user_id = %user_id,
            records = records.len(),
            "Fetched records from external source"
        );
        Ok(records)
    }

    /// Marks the job FAILED, preserving whatever counters it accumulated,
    /// and informs the user. Called when the run itself cannot continue.
    async fn settle_failed(&self, tracker: &Arc<Mutex<JobTracker>>) {
        let mut guard = tracker.lock().await;
        if let Err(error) = guard.fail(ImportCounters::default()).await {
            tracing::error!(error = %error, "Failed to mark import job as failed");
            return;
        }
        let job = guard.job().clone();
        drop(guard);
        self.notify_outcome(&job).await;
    }

    /// Fire-and-forget: delivery problems are logged and never change the
    /// job's outcome.
    async fn notify_outcome(&self, job: &ImportJob) {
        let subject = format!("Import {}", job.status.as_str());
        let body = serde_json::json!({
            "job_id": job.job_id,
            "source": job.source,
            "status": job.status.as_str(),
            "summary": job.outcome_summary(),
        })
        .to_string();

        if let Err(error) = self.notifier.notify(job.user_id, &subject, &body).await {
            tracing::warn!(
                job_id = %job.job_id,
                error = %error,
                "Notification delivery failed"
            );
        }
    }
}

/// Imports one record: validate, fingerprint, dedupe, persist. Duplicate
/// fingerprints - whether caught by the seen-set or by the store's
/// uniqueness constraint - classify as skipped.
async fn import_record(
    ledger: Arc<dyn LedgerStore>,
    fingerprints: Arc<dyn FingerprintStore>,
    tallies: Arc<RunTallies>,
    user_id: Uuid,
    wallet_id: Option<Uuid>,
    record: ExternalRecord,
) -> Result<ImportOutcome, AppError> {
    validate_record(&record)?;

    let fingerprint = record.fingerprint();
    if fingerprints.seen(user_id, &fingerprint).await? {
        tallies.skipped.fetch_add(1, Ordering::SeqCst);
        record_import_record("skipped");
        return Ok(ImportOutcome::Skipped);
    }

    let inserted = match record {
        ExternalRecord::Transaction(txn) => {
            let transaction = LedgerTransaction {
                transaction_id: Uuid::new_v4(),
                wallet_id,
                amount: txn.amount.round_dp(2),
                date: txn.date,
                description: txn.description,
                channel: txn.channel,
                reconciliation: None,
            };
            ledger.insert_transaction(user_id, &fingerprint, transaction).await
        }
        ExternalRecord::Sale(sale) => {
            let record = SaleRecord {
                sale_id: Uuid::new_v4(),
                customer: sale.customer.clone(),
                total_amount: sale.total_amount.round_dp(2),
                wallet_id,
                channel: sale.channel.clone(),
                installments: build_installments(
                    sale.total_amount,
                    &sale.installments,
                    sale.installment_count,
                    sale.first_due_date,
                ),
            };
            let predictions = expand_sale(&record);
            ledger.insert_sale(user_id, &fingerprint, record, predictions).await
        }
    };

    match inserted {
        Ok(()) => {
            // Best-effort cache; the store's uniqueness constraint is the
            // real guard, so a write failure here only costs a lookup later.
            if let Err(error) = fingerprints.record(user_id, &fingerprint).await {
                tracing::warn!(error = %error, "Failed to record fingerprint");
            }
            tallies.imported.fetch_add(1, Ordering::SeqCst);
            record_import_record("imported");
            Ok(ImportOutcome::Imported)
        }
        Err(AppError::Conflict(error)) => {
            tracing::debug!(error = %error, "Record already imported, skipping");
            tallies.skipped.fetch_add(1, Ordering::SeqCst);
            record_import_record("skipped");
            Ok(ImportOutcome::Skipped)
        }
        Err(error) => Err(error),
    }
}

fn validate_record(record: &ExternalRecord) -> Result<(), AppError> {
    if record.descriptor().trim().is_empty() {
        return Err(AppError::ValidationError(
            "record carries no external id or description".to_string(),
        ));
    }

    match record {
        ExternalRecord::Transaction(txn) => {
            if txn.amount.is_zero() {
                return Err(AppError::ValidationError(
                    "transaction amount must be non-zero".to_string(),
                ));
            }
        }
        ExternalRecord::Sale(sale) => {
            if sale.total_amount <= Decimal::ZERO {
                return Err(AppError::ValidationError(
                    "sale total must be positive".to_string(),
                ));
            }
            if sale.installments.is_empty() && sale.installment_count == 0 {
                return Err(AppError::ValidationError(
                    "sale carries neither installments nor an installment count".to_string(),
                ));
            }
            if !sale.installments.is_empty() {
                let sum: Decimal = sale.installments.iter().map(|i| i.amount.round_dp(2)).sum();
                if sum != sale.total_amount.round_dp(2) {
                    return Err(AppError::ValidationError(format!(
                        "installment amounts sum to {} but sale total is {}",
                        sum, sale.total_amount
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExternalSale, ExternalTransaction};
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn transaction(external_id: &str, amount: &str) -> ExternalRecord {
        ExternalRecord::Transaction(ExternalTransaction {
            external_id: external_id.to_string(),
            amount: dec(amount),
            date: date("2024-03-10"),
            description: "card settlement".to_string(),
            channel: None,
        })
    }

    #[test]
    fn test_validate_rejects_blank_identity() {
        let mut record = transaction("", "10.00");
        if let ExternalRecord::Transaction(t) = &mut record {
            t.description = "  ".to_string();
        }
        assert!(validate_record(&record).unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_rejects_zero_amount() {
        assert!(validate_record(&transaction("t-1", "0"))
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_validate_rejects_mismatched_installment_sum() {
        let record = ExternalRecord::Sale(ExternalSale {
            external_id: "s-1".to_string(),
            customer: "acme".to_string(),
            total_amount: dec("100.00"),
            sale_date: date("2024-03-01"),
            description: "order".to_string(),
            channel: None,
            installment_count: 2,
            first_due_date: date("2024-04-01"),
            installments: vec![
                crate::models::ExternalInstallment {
                    number: 1,
                    amount: dec("60.00"),
                    due_date: date("2024-04-01"),
                },
                crate::models::ExternalInstallment {
                    number: 2,
                    amount: dec("50.00"),
                    due_date: date("2024-05-01"),
                },
            ],
        });
        assert!(validate_record(&record).unwrap_err().is_validation());
    }

    #[test]
    fn test_validate_accepts_count_only_sale() {
        let record = ExternalRecord::Sale(ExternalSale {
            external_id: "s-2".to_string(),
            customer: "acme".to_string(),
            total_amount: dec("100.00"),
            sale_date: date("2024-03-01"),
            description: "order".to_string(),
            channel: None,
            installment_count: 3,
            first_due_date: date("2024-04-01"),
            installments: Vec::new(),
        });
        assert!(validate_record(&record).is_ok());
    }
}
