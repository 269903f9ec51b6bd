//! Common test utilities for import-service integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use import_service::config::ImportConfig;
use import_service::models::{
    DateWindow, ExternalRecord, ExternalSale, ExternalTransaction, Installment,
    InstallmentStatus, LedgerTransaction, SaleRecord,
};
use import_service::services::{BatchOptions, ImportService};
use import_service::stores::{
    MemoryFingerprintStore, MemoryJobStore, MemoryLedgerStore, MemoryNotificationSink,
    MemorySalesSource,
};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,import_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::from_str(s).unwrap()
}

/// Window covering March 2024, where all fixture records live.
pub fn march() -> DateWindow {
    DateWindow::new(date("2024-03-01"), date("2024-03-31"))
}

/// Fast batch settings so retry delays do not slow the suite down.
pub fn test_config() -> ImportConfig {
    let mut config = ImportConfig::default();
    config.batch = BatchOptions {
        batch_size: 10,
        concurrency: 3,
        retry_count: 1,
        retry_delay: Duration::from_millis(5),
    };
    config
}

pub fn transaction_record(external_id: &str, amount: &str, on: &str) -> ExternalRecord {
    ExternalRecord::Transaction(ExternalTransaction {
        external_id: external_id.to_string(),
        amount: dec(amount),
        date: date(on),
        description: format!("settlement {}", external_id),
        channel: None,
    })
}

pub fn sale_record(external_id: &str, total: &str, count: u32, first_due: &str) -> ExternalRecord {
    ExternalRecord::Sale(ExternalSale {
        external_id: external_id.to_string(),
        customer: "Acme Corp".to_string(),
        total_amount: dec(total),
        sale_date: date("2024-03-05"),
        description: format!("order {}", external_id),
        channel: None,
        installment_count: count,
        first_due_date: date(first_due),
        installments: Vec::new(),
    })
}

/// An unlinked ledger transaction for seeding reconciliation pools.
pub fn ledger_transaction(amount: &str, on: &str) -> LedgerTransaction {
    LedgerTransaction {
        transaction_id: Uuid::new_v4(),
        wallet_id: None,
        amount: dec(amount),
        date: date(on),
        description: "bank deposit".to_string(),
        channel: None,
        reconciliation: None,
    }
}

/// A one-installment sale already in the ledger, open for matching.
pub fn open_sale(amount: &str, due: &str) -> SaleRecord {
    SaleRecord {
        sale_id: Uuid::new_v4(),
        customer: "Acme Corp".to_string(),
        total_amount: dec(amount),
        wallet_id: None,
        channel: None,
        installments: vec![Installment {
            installment_id: Uuid::new_v4(),
            number: 1,
            total_count: 1,
            amount: dec(amount),
            due_date: date(due),
            status: InstallmentStatus::Pending,
        }],
    }
}

/// Test application wrapper around the service and its in-memory stores.
pub struct TestApp {
    pub service: ImportService,
    pub source: Arc<MemorySalesSource>,
    pub ledger: Arc<MemoryLedgerStore>,
    pub jobs: Arc<MemoryJobStore>,
    pub notifier: Arc<MemoryNotificationSink>,
    pub user_id: Uuid,
}

/// Builds a service over scripted records and fresh in-memory stores.
pub fn spawn_app(records: Vec<ExternalRecord>) -> TestApp {
    spawn_app_with(records, test_config())
}

pub fn spawn_app_with(records: Vec<ExternalRecord>, config: ImportConfig) -> TestApp {
    init_tracing();
    let source = Arc::new(MemorySalesSource::new(records, 25));
    spawn_app_with_source(source, config)
}

pub fn spawn_app_with_source(source: Arc<MemorySalesSource>, config: ImportConfig) -> TestApp {
    init_tracing();
    let ledger = Arc::new(MemoryLedgerStore::new());
    let jobs = Arc::new(MemoryJobStore::new());
    let notifier = Arc::new(MemoryNotificationSink::new());
    let fingerprints = Arc::new(MemoryFingerprintStore::new(config.fingerprint_ttl));

    let service = ImportService::new(
        config,
        source.clone(),
        ledger.clone(),
        jobs.clone(),
        notifier.clone(),
        fingerprints,
    );

    TestApp {
        service,
        source,
        ledger,
        jobs,
        notifier,
        user_id: Uuid::new_v4(),
    }
}
