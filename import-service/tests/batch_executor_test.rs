//! Integration tests for the batch executor: accounting, retries, guards,
//! events, and cancellation.

mod common;

use common::init_tracing;
use import_service::services::{BatchEvent, BatchExecutor, BatchOptions};
use service_core::error::AppError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn fast_options() -> BatchOptions {
    BatchOptions {
        batch_size: 10,
        concurrency: 3,
        retry_count: 2,
        retry_delay: Duration::from_millis(2),
    }
}

#[tokio::test]
async fn processed_equals_succeeded_plus_skipped_plus_failed() {
    init_tracing();
    let executor = BatchExecutor::new(fast_options());
    let items: Vec<u32> = (0..25).collect();

    let outcome = executor
        .run(
            items,
            |i| async move {
                if i % 7 == 0 {
                    Err(AppError::ValidationError(format!("item {} malformed", i)))
                } else if i % 5 == 0 {
                    Err(AppError::InternalError(anyhow::anyhow!("item {} broke", i)))
                } else {
                    Ok(i * 2)
                }
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(outcome.processed, 25);
    assert_eq!(
        outcome.processed,
        outcome.results.len() + outcome.skipped.len() + outcome.failures.len()
    );
    assert!(!outcome.cancelled);
}

#[tokio::test]
async fn empty_input_returns_immediately() {
    init_tracing();
    let executor = BatchExecutor::new(fast_options());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = executor
        .run(Vec::<u32>::new(), |i| async move { Ok::<_, AppError>(i) }, Some(tx), None)
        .await
        .unwrap();

    assert_eq!(outcome.processed, 0);
    assert!(outcome.results.is_empty());
    assert_eq!(rx.try_recv().unwrap(), BatchEvent::Completed { processed: 0 });
}

#[tokio::test]
async fn failing_item_gets_initial_attempt_plus_retries() {
    init_tracing();
    let executor = BatchExecutor::new(fast_options());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let outcome = executor
        .run(
            vec![1u32],
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(AppError::InternalError(anyhow::anyhow!("always broken")))
                }
            },
            None,
            None,
        )
        .await
        .unwrap();

    // retry_count = 2: one initial attempt plus two retries.
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].attempts, 3);
}

#[tokio::test]
async fn validation_errors_are_never_retried() {
    init_tracing();
    let executor = BatchExecutor::new(fast_options());
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = attempts.clone();

    let outcome = executor
        .run(
            vec![1u32],
            move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<u32, _>(AppError::ValidationError("malformed".to_string()))
                }
            },
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.skipped.len(), 1);
    assert!(outcome.failures.is_empty());
}

#[tokio::test]
async fn run_while_running_is_rejected() {
    init_tracing();
    let executor = Arc::new(BatchExecutor::new(fast_options()));
    let background = executor.clone();

    let handle = tokio::spawn(async move {
        background
            .run(
                (0..20u32).collect(),
                |i| async move {
                    tokio::time::sleep(Duration::from_millis(15)).await;
                    Ok::<_, AppError>(i)
                },
                None,
                None,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = executor
        .run(vec![1u32], |i| async move { Ok::<_, AppError>(i) }, None, None)
        .await;
    assert!(matches!(second, Err(AppError::JobStateError(_))));

    let first = handle.await.unwrap().unwrap();
    assert_eq!(first.processed, 20);

    // The guard releases once the first run settles.
    let third = executor
        .run(vec![1u32], |i| async move { Ok::<_, AppError>(i) }, None, None)
        .await
        .unwrap();
    assert_eq!(third.processed, 1);
}

#[tokio::test]
async fn cancel_halts_dispatch_but_lets_chunks_settle() {
    init_tracing();
    let options = BatchOptions {
        batch_size: 4,
        concurrency: 2,
        retry_count: 0,
        retry_delay: Duration::from_millis(1),
    };
    let executor = Arc::new(BatchExecutor::new(options));
    let background = executor.clone();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        background
            .run(
                (0..100u32).collect(),
                |i| async move {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Ok::<_, AppError>(i)
                },
                Some(tx),
                None,
            )
            .await
    });

    tokio::time::sleep(Duration::from_millis(25)).await;
    executor.cancel();

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert!(outcome.processed <= 100);
    // Chunks already dispatched settle normally: processed is a multiple of
    // full chunks, and every settled item produced a result.
    assert_eq!(outcome.results.len(), outcome.processed);

    let mut saw_cancelled = false;
    while let Ok(event) = rx.try_recv() {
        if let BatchEvent::Cancelled { processed } = event {
            saw_cancelled = true;
            assert_eq!(processed, outcome.processed);
        }
    }
    assert!(saw_cancelled);
}

#[tokio::test]
async fn events_arrive_in_lifecycle_order_with_monotonic_progress() {
    init_tracing();
    let executor = BatchExecutor::new(BatchOptions {
        batch_size: 5,
        concurrency: 2,
        retry_count: 0,
        retry_delay: Duration::from_millis(1),
    });
    let (tx, mut rx) = mpsc::unbounded_channel();

    let outcome = executor
        .run(
            (0..12u32).collect(),
            |i| async move { Ok::<_, AppError>(i) },
            Some(tx),
            None,
        )
        .await
        .unwrap();
    assert_eq!(outcome.processed, 12);

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    assert_eq!(events.first(), Some(&BatchEvent::Started { total: 12 }));
    assert_eq!(events.last(), Some(&BatchEvent::Completed { processed: 12 }));

    let mut last_progress = 0;
    let mut batches_started = 0;
    for event in &events {
        match event {
            BatchEvent::Progress { processed, total } => {
                assert!(*processed >= last_progress);
                assert_eq!(*total, 12);
                last_progress = *processed;
            }
            BatchEvent::BatchStarted { .. } => batches_started += 1,
            _ => {}
        }
    }
    assert_eq!(last_progress, 12);
    assert_eq!(batches_started, 3);
}

#[tokio::test]
async fn batch_callback_sees_every_batch() {
    init_tracing();
    let executor = BatchExecutor::new(BatchOptions {
        batch_size: 4,
        concurrency: 2,
        retry_count: 0,
        retry_delay: Duration::from_millis(1),
    });

    let seen = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let sink = seen.clone();
    let outcome = executor
        .run(
            (0..10u32).collect(),
            |i| async move { Ok::<_, AppError>(i) },
            None,
            Some(Box::new(move |summary| {
                let sink = sink.clone();
                Box::pin(async move {
                    sink.lock().await.push(summary);
                })
            })),
        )
        .await
        .unwrap();
    assert_eq!(outcome.processed, 10);

    let summaries = seen.lock().await;
    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries.iter().map(|s| s.succeeded).sum::<usize>(), 10);
    assert_eq!(summaries.last().unwrap().processed, 10);
}
