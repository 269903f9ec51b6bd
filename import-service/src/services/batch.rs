//! Bounded-concurrency batch execution with fixed-delay retries and
//! cooperative cancellation.

use crate::services::metrics::record_batch_retry;
use futures::future::{join_all, BoxFuture};
use service_core::error::AppError;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Tuning for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Items per sequential batch.
    pub batch_size: usize,
    /// Items processed in parallel inside a batch.
    pub concurrency: usize,
    /// Retries per item after the initial attempt.
    pub retry_count: u32,
    /// Flat delay between attempts; no exponential growth.
    pub retry_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 5,
            retry_count: 3,
            retry_delay: Duration::from_millis(1000),
        }
    }
}

/// Lifecycle signals emitted while a run progresses. Delivered on an
/// unbounded channel, so emission never blocks the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchEvent {
    Started { total: usize },
    BatchStarted { batch: usize, size: usize },
    ItemProcessed { index: usize },
    ItemFailed { index: usize, error: String },
    BatchCompleted { batch: usize, processed: usize },
    Progress { processed: usize, total: usize },
    Completed { processed: usize },
    Cancelled { processed: usize },
}

/// An item that exhausted its retries, or was rejected by validation.
#[derive(Debug)]
pub struct ItemFailure {
    pub index: usize,
    pub attempts: u32,
    pub error: AppError,
}

/// Accumulated results of one run. `skipped` holds validation rejects, which
/// are classified without retrying.
#[derive(Debug)]
pub struct BatchOutcome<R> {
    pub results: Vec<R>,
    pub failures: Vec<ItemFailure>,
    pub skipped: Vec<ItemFailure>,
    pub processed: usize,
    pub cancelled: bool,
}

impl<R> BatchOutcome<R> {
    fn new() -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            processed: 0,
            cancelled: false,
        }
    }
}

/// Settled counts for one batch, handed to the batch-complete callback.
#[derive(Debug, Clone, Copy)]
pub struct BatchSummary {
    pub batch: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Cumulative items settled across the whole run.
    pub processed: usize,
    pub total: usize,
}

/// Async callback invoked after each batch settles.
pub type BatchCallback = Box<dyn FnMut(BatchSummary) -> BoxFuture<'static, ()> + Send>;

enum Attempt<R> {
    Ok(R),
    Skipped(AppError),
    Failed { attempts: u32, error: AppError },
}

/// Runs async work over a list of items: sequential batches, bounded
/// parallelism inside each batch, flat-delay retries per item. A single
/// item's permanent failure never aborts the run.
pub struct BatchExecutor {
    options: BatchOptions,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl BatchExecutor {
    pub fn new(options: BatchOptions) -> Self {
        Self {
            options,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Requests cooperative cancellation of the in-flight run. The flag is
    /// checked between chunks and batches; a chunk that has already been
    /// dispatched settles normally.
    pub fn cancel(&self) {
        self.cancel.lock().expect("cancel token lock poisoned").cancel();
    }

    /// Processes `items` and returns the accumulated outcome. Fails
    /// immediately with a job-state error if a run is already active on this
    /// instance; an empty item list returns an empty outcome.
    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        process: F,
        events: Option<UnboundedSender<BatchEvent>>,
        on_batch: Option<BatchCallback>,
    ) -> Result<BatchOutcome<R>, AppError>
    where
        T: Clone,
        F: Fn(T) -> Fut + Clone,
        Fut: Future<Output = Result<R, AppError>>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::JobStateError(
                "batch run already running on this executor".to_string(),
            ));
        }

        let cancel = {
            let mut guard = self.cancel.lock().expect("cancel token lock poisoned");
            *guard = CancellationToken::new();
            guard.clone()
        };

        let outcome = self.run_inner(items, process, events, on_batch, cancel).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn run_inner<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        process: F,
        events: Option<UnboundedSender<BatchEvent>>,
        mut on_batch: Option<BatchCallback>,
        cancel: CancellationToken,
    ) -> BatchOutcome<R>
    where
        T: Clone,
        F: Fn(T) -> Fut + Clone,
        Fut: Future<Output = Result<R, AppError>>,
    {
        let total = items.len();
        let mut outcome = BatchOutcome::new();

        if total == 0 {
            emit(&events, BatchEvent::Completed { processed: 0 });
            return outcome;
        }

        emit(&events, BatchEvent::Started { total });
        tracing::info!(
            total,
            batch_size = self.options.batch_size,
            concurrency = self.options.concurrency,
            "Batch run started"
        );

        let batch_size = self.options.batch_size.max(1);
        let concurrency = self.options.concurrency.max(1);
        let indexed: Vec<(usize, T)> = items.into_iter().enumerate().collect();

        for (batch_no, batch) in indexed.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(outcome, &events);
            }

            let batch_no = batch_no + 1;
            emit(
                &events,
                BatchEvent::BatchStarted { batch: batch_no, size: batch.len() },
            );

            let mut summary = BatchSummary {
                batch: batch_no,
                succeeded: 0,
                skipped: 0,
                failed: 0,
                processed: outcome.processed,
                total,
            };
            let mut batch_cancelled = false;

            for chunk in batch.chunks(concurrency) {
                if cancel.is_cancelled() {
                    batch_cancelled = true;
                    break;
                }

                let attempts = join_all(chunk.iter().map(|(index, item)| {
                    let process = process.clone();
                    let item = item.clone();
                    let options = &self.options;
                    let index = *index;
                    async move { (index, process_with_retry(options, index, item, process).await) }
                }))
                .await;

                for (index, attempt) in attempts {
                    outcome.processed += 1;
                    match attempt {
                        Attempt::Ok(result) => {
                            outcome.results.push(result);
                            summary.succeeded += 1;
                            emit(&events, BatchEvent::ItemProcessed { index });
                        }
                        Attempt::Skipped(error) => {
                            emit(
                                &events,
                                BatchEvent::ItemFailed { index, error: error.to_string() },
                            );
                            outcome.skipped.push(ItemFailure { index, attempts: 1, error });
                            summary.skipped += 1;
                        }
                        Attempt::Failed { attempts, error } => {
                            emit(
                                &events,
                                BatchEvent::ItemFailed { index, error: error.to_string() },
                            );
                            outcome.failures.push(ItemFailure { index, attempts, error });
                            summary.failed += 1;
                        }
                    }
                }

                emit(
                    &events,
                    BatchEvent::Progress { processed: outcome.processed, total },
                );
            }

            summary.processed = outcome.processed;
            if let Some(callback) = on_batch.as_mut() {
                callback(summary).await;
            }

            if batch_cancelled {
                return self.finish_cancelled(outcome, &events);
            }

            emit(
                &events,
                BatchEvent::BatchCompleted { batch: batch_no, processed: outcome.processed },
            );
        }

        emit(&events, BatchEvent::Completed { processed: outcome.processed });
        tracing::info!(
            processed = outcome.processed,
            succeeded = outcome.results.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failures.len(),
            "Batch run completed"
        );
        outcome
    }

    fn finish_cancelled<R>(
        &self,
        mut outcome: BatchOutcome<R>,
        events: &Option<UnboundedSender<BatchEvent>>,
    ) -> BatchOutcome<R> {
        outcome.cancelled = true;
        emit(events, BatchEvent::Cancelled { processed: outcome.processed });
        tracing::info!(processed = outcome.processed, "Batch run cancelled");
        outcome
    }
}

async fn process_with_retry<T, R, F, Fut>(
    options: &BatchOptions,
    index: usize,
    item: T,
    process: F,
) -> Attempt<R>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<R, AppError>>,
{
    let mut attempt = 0u32;

    loop {
        match process(item.clone()).await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(index, attempt = attempt + 1, "Item succeeded after retry");
                }
                return Attempt::Ok(result);
            }
            Err(error) if error.is_validation() => {
                tracing::debug!(index, error = %error, "Item rejected by validation, not retried");
                return Attempt::Skipped(error);
            }
            Err(error) => {
                if attempt >= options.retry_count || error.is_permanent_failure() {
                    tracing::warn!(
                        index,
                        attempts = attempt + 1,
                        error = %error,
                        "Item failed permanently"
                    );
                    return Attempt::Failed { attempts: attempt + 1, error };
                }

                record_batch_retry();
                tracing::warn!(
                    index,
                    attempt = attempt + 1,
                    error = %error,
                    delay_ms = options.retry_delay.as_millis() as u64,
                    "Item failed, retrying after delay"
                );
                tokio::time::sleep(options.retry_delay).await;
                attempt += 1;
            }
        }
    }
}

fn emit(events: &Option<UnboundedSender<BatchEvent>>, event: BatchEvent) {
    if let Some(tx) = events {
        // Receiver may have been dropped by a caller that stopped listening.
        let _ = tx.send(event);
    }
}
