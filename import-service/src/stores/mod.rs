//! External collaborator interfaces. The core consumes and produces data
//! only through these seams; transports and persistence schemas live with
//! the embedder.

use crate::models::{
    CashFlowPredictionEntry, DateWindow, ImportJob, JobFilter, LedgerTransaction, OpenInstallment,
    RecordPage, ReconciliationLink, SaleRecord,
};
use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

pub mod memory;

pub use memory::{
    MemoryFingerprintStore, MemoryJobStore, MemoryLedgerStore, MemoryNotificationSink,
    MemorySalesSource,
};

/// Paginated access to a third-party bookkeeping system.
#[async_trait]
pub trait ExternalSalesSource: Send + Sync {
    async fn fetch_page(
        &self,
        user_id: Uuid,
        window: DateWindow,
        page: u32,
    ) -> Result<RecordPage, AppError>;
}

/// Reads and writes ledger data. Inserts are fingerprint-keyed and must
/// return `AppError::Conflict` for a fingerprint that was already imported;
/// this is the uniqueness constraint the dedup check relies on.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_transaction(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        transaction: LedgerTransaction,
    ) -> Result<(), AppError>;

    async fn insert_sale(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        sale: SaleRecord,
        predictions: Vec<CashFlowPredictionEntry>,
    ) -> Result<(), AppError>;

    /// Transactions in the window without a reconciliation link.
    async fn unlinked_transactions(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<Vec<LedgerTransaction>, AppError>;

    /// Installments in the window still waiting for money.
    async fn open_installments(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<Vec<OpenInstallment>, AppError>;

    async fn persist_links(
        &self,
        user_id: Uuid,
        links: &[ReconciliationLink],
    ) -> Result<(), AppError>;

    /// How many links this user has confirmed by hand; gates automatic
    /// matching.
    async fn manual_link_count(&self, user_id: Uuid) -> Result<u64, AppError>;
}

/// Persistence for import job records.
#[async_trait]
pub trait ImportJobStore: Send + Sync {
    async fn create(&self, job: &ImportJob) -> Result<(), AppError>;
    async fn update(&self, job: &ImportJob) -> Result<(), AppError>;
    async fn get(&self, job_id: Uuid) -> Result<Option<ImportJob>, AppError>;
    async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: JobFilter,
    ) -> Result<Vec<ImportJob>, AppError>;
}

/// Delivers outcome notifications to the initiating user. Callers treat
/// delivery as fire-and-forget; a failure here must never fail a job.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, user_id: Uuid, subject: &str, body: &str) -> Result<(), AppError>;
}

/// Best-effort seen-set of import fingerprints. Implementations decide
/// retention; the ledger's uniqueness constraint remains the real
/// idempotency guarantee.
#[async_trait]
pub trait FingerprintStore: Send + Sync {
    async fn seen(&self, user_id: Uuid, fingerprint: &str) -> Result<bool, AppError>;
    async fn record(&self, user_id: Uuid, fingerprint: &str) -> Result<(), AppError>;
}
