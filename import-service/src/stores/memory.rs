//! In-memory store implementations, used by the test suite and by embedders
//! that keep state in process.

use crate::models::{
    CashFlowPredictionEntry, DateWindow, ImportJob, InstallmentStatus, JobFilter,
    LedgerTransaction, MatchMethod, OpenInstallment, RecordPage, ReconciliationLink,
    ReconciliationMeta, SaleRecord,
};
use crate::models::ExternalRecord;
use crate::stores::{
    ExternalSalesSource, FingerprintStore, ImportJobStore, LedgerStore, NotificationSink,
};
use async_trait::async_trait;
use service_core::error::AppError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

// ============================================================================
// External Source
// ============================================================================

/// Scripted source: serves fixed pages, optionally refusing every call the
/// way an unreachable upstream would.
pub struct MemorySalesSource {
    pages: Vec<Vec<ExternalRecord>>,
    unreachable: AtomicBool,
}

impl MemorySalesSource {
    pub fn new(records: Vec<ExternalRecord>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let pages = records.chunks(page_size).map(|c| c.to_vec()).collect();
        Self { pages, unreachable: AtomicBool::new(false) }
    }

    pub fn unreachable() -> Self {
        Self { pages: Vec::new(), unreachable: AtomicBool::new(true) }
    }

    pub fn set_unreachable(&self, value: bool) {
        self.unreachable.store(value, Ordering::SeqCst);
    }
}

#[async_trait]
impl ExternalSalesSource for MemorySalesSource {
    async fn fetch_page(
        &self,
        _user_id: Uuid,
        _window: DateWindow,
        page: u32,
    ) -> Result<RecordPage, AppError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(AppError::UpstreamUnavailable(anyhow::anyhow!(
                "external source unreachable"
            )));
        }

        let index = page as usize;
        let records = self.pages.get(index).cloned().unwrap_or_default();
        let next_page = if index + 1 < self.pages.len() { Some(page + 1) } else { None };
        Ok(RecordPage { records, next_page })
    }
}

// ============================================================================
// Ledger Store
// ============================================================================

#[derive(Default)]
struct LedgerState {
    fingerprints: HashSet<(Uuid, String)>,
    transactions: HashMap<Uuid, Vec<LedgerTransaction>>,
    sales: HashMap<Uuid, Vec<SaleRecord>>,
    predictions: HashMap<Uuid, Vec<CashFlowPredictionEntry>>,
    links: HashMap<Uuid, Vec<ReconciliationLink>>,
    manual_baseline: HashMap<Uuid, u64>,
}

/// Ledger store backed by process memory. Enforces fingerprint uniqueness,
/// which is the idempotency guarantee the import pipeline relies on.
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: RwLock<LedgerState>,
    failing_inserts: AtomicU32,
    insert_delay_ms: AtomicU64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` inserts fail with a store error, to exercise
    /// retry and error accounting.
    pub fn fail_inserts(&self, count: u32) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Adds artificial latency to every insert, to give cancellation tests a
    /// run that is actually in flight.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn apply_insert_faults(&self) -> Result<(), AppError> {
        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(AppError::StoreError(anyhow::anyhow!("ledger write failed")));
        }
        Ok(())
    }

    /// Preloads a transaction without going through the import pipeline.
    pub async fn seed_transaction(&self, user_id: Uuid, transaction: LedgerTransaction) {
        let mut state = self.state.write().await;
        state.transactions.entry(user_id).or_default().push(transaction);
    }

    /// Preloads a sale without going through the import pipeline.
    pub async fn seed_sale(&self, user_id: Uuid, sale: SaleRecord) {
        let mut state = self.state.write().await;
        state.sales.entry(user_id).or_default().push(sale);
    }

    /// Sets the manually-confirmed-link history used by the readiness gate.
    pub async fn set_manual_link_count(&self, user_id: Uuid, count: u64) {
        let mut state = self.state.write().await;
        state.manual_baseline.insert(user_id, count);
    }

    pub async fn transactions_for(&self, user_id: Uuid) -> Vec<LedgerTransaction> {
        self.state.read().await.transactions.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn sales_for(&self, user_id: Uuid) -> Vec<SaleRecord> {
        self.state.read().await.sales.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn predictions_for(&self, user_id: Uuid) -> Vec<CashFlowPredictionEntry> {
        self.state.read().await.predictions.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn links_for(&self, user_id: Uuid) -> Vec<ReconciliationLink> {
        self.state.read().await.links.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn transaction_count(&self, user_id: Uuid) -> usize {
        self.state.read().await.transactions.get(&user_id).map_or(0, |t| t.len())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_transaction(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        transaction: LedgerTransaction,
    ) -> Result<(), AppError> {
        self.apply_insert_faults().await?;
        let mut state = self.state.write().await;
        if !state.fingerprints.insert((user_id, fingerprint.to_string())) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "fingerprint {} already imported",
                fingerprint
            )));
        }
        state.transactions.entry(user_id).or_default().push(transaction);
        Ok(())
    }

    async fn insert_sale(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        sale: SaleRecord,
        predictions: Vec<CashFlowPredictionEntry>,
    ) -> Result<(), AppError> {
        self.apply_insert_faults().await?;
        let mut state = self.state.write().await;
        if !state.fingerprints.insert((user_id, fingerprint.to_string())) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "fingerprint {} already imported",
                fingerprint
            )));
        }
        state.sales.entry(user_id).or_default().push(sale);
        state.predictions.entry(user_id).or_default().extend(predictions);
        Ok(())
    }

    async fn unlinked_transactions(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<Vec<LedgerTransaction>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .transactions
            .get(&user_id)
            .map(|transactions| {
                transactions
                    .iter()
                    .filter(|t| t.reconciliation.is_none())
                    .filter(|t| window.contains(t.date))
                    .filter(|t| wallet_id.is_none() || t.wallet_id == wallet_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn open_installments(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<Vec<OpenInstallment>, AppError> {
        let state = self.state.read().await;
        let mut open = Vec::new();
        if let Some(sales) = state.sales.get(&user_id) {
            for sale in sales {
                if wallet_id.is_some() && sale.wallet_id != wallet_id {
                    continue;
                }
                for installment in &sale.installments {
                    if installment.status.is_open() && window.contains(installment.due_date) {
                        open.push(OpenInstallment {
                            sale_id: sale.sale_id,
                            installment_id: installment.installment_id,
                            number: installment.number,
                            amount: installment.amount,
                            due_date: installment.due_date,
                            wallet_id: sale.wallet_id,
                            channel: sale.channel.clone(),
                        });
                    }
                }
            }
        }
        open.sort_by_key(|i| i.due_date);
        Ok(open)
    }

    async fn persist_links(
        &self,
        user_id: Uuid,
        links: &[ReconciliationLink],
    ) -> Result<(), AppError> {
        let mut state = self.state.write().await;

        for link in links {
            let sale_id = state.sales.get(&user_id).and_then(|sales| {
                sales
                    .iter()
                    .find(|s| {
                        s.installments
                            .iter()
                            .any(|i| i.installment_id == link.installment_id)
                    })
                    .map(|s| s.sale_id)
            });

            let group_size = link.transaction_ids.len() as u32;
            if let Some(transactions) = state.transactions.get_mut(&user_id) {
                for transaction in transactions
                    .iter_mut()
                    .filter(|t| link.transaction_ids.contains(&t.transaction_id))
                {
                    transaction.reconciliation = Some(ReconciliationMeta {
                        linked_sale_id: sale_id,
                        linked_installment_id: Some(link.installment_id),
                        confidence: link.confidence,
                        is_manual: link.method == MatchMethod::Manual,
                        is_part_of_group: group_size > 1,
                        group_size,
                    });
                }
            }

            if let Some(sales) = state.sales.get_mut(&user_id) {
                for sale in sales {
                    for installment in &mut sale.installments {
                        if installment.installment_id == link.installment_id {
                            installment.status = InstallmentStatus::Paid;
                        }
                    }
                }
            }

            state.links.entry(user_id).or_default().push(link.clone());
        }

        Ok(())
    }

    async fn manual_link_count(&self, user_id: Uuid) -> Result<u64, AppError> {
        let state = self.state.read().await;
        let baseline = state.manual_baseline.get(&user_id).copied().unwrap_or(0);
        let manual_links = state
            .links
            .get(&user_id)
            .map(|links| {
                links
                    .iter()
                    .filter(|l| l.method == MatchMethod::Manual)
                    .count() as u64
            })
            .unwrap_or(0);
        Ok(baseline + manual_links)
    }
}

// ============================================================================
// Import Job Store
// ============================================================================

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, ImportJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportJobStore for MemoryJobStore {
    async fn create(&self, job: &ImportJob) -> Result<(), AppError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "import job {} already exists",
                job.job_id
            )));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn update(&self, job: &ImportJob) -> Result<(), AppError> {
        let mut jobs = self.jobs.write().await;
        if !jobs.contains_key(&job.job_id) {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "import job {} not found",
                job.job_id
            )));
        }
        jobs.insert(job.job_id, job.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ImportJob>, AppError> {
        Ok(self.jobs.read().await.get(&job_id).cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        filter: JobFilter,
    ) -> Result<Vec<ImportJob>, AppError> {
        let jobs = self.jobs.read().await;
        let mut listed: Vec<ImportJob> = jobs
            .values()
            .filter(|j| j.user_id == user_id)
            .filter(|j| filter.status.map_or(true, |s| j.status == s))
            .filter(|j| filter.source.as_deref().map_or(true, |s| j.source == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.started_utc.cmp(&a.started_utc));
        Ok(listed)
    }
}

// ============================================================================
// Notification Sink
// ============================================================================

/// Records notifications; can be switched to fail for testing the
/// fire-and-forget contract.
#[derive(Default)]
pub struct MemoryNotificationSink {
    sent: RwLock<Vec<(Uuid, String, String)>>,
    failing: AtomicBool,
}

impl MemoryNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, value: bool) {
        self.failing.store(value, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<(Uuid, String, String)> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl NotificationSink for MemoryNotificationSink {
    async fn notify(&self, user_id: Uuid, subject: &str, body: &str) -> Result<(), AppError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "notification channel down"
            )));
        }
        self.sent
            .write()
            .await
            .push((user_id, subject.to_string(), body.to_string()));
        Ok(())
    }
}

// ============================================================================
// Fingerprint Store
// ============================================================================

/// Seen-set with an explicit TTL. Injected where surrounding code would
/// otherwise reach for a process-wide cache.
pub struct MemoryFingerprintStore {
    ttl: Duration,
    entries: RwLock<HashMap<(Uuid, String), Instant>>,
}

impl MemoryFingerprintStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl FingerprintStore for MemoryFingerprintStore {
    async fn seen(&self, user_id: Uuid, fingerprint: &str) -> Result<bool, AppError> {
        let key = (user_id, fingerprint.to_string());
        let mut entries = self.entries.write().await;
        match entries.get(&key) {
            Some(recorded) if recorded.elapsed() < self.ttl => Ok(true),
            Some(_) => {
                entries.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn record(&self, user_id: Uuid, fingerprint: &str) -> Result<(), AppError> {
        self.entries
            .write()
            .await
            .insert((user_id, fingerprint.to_string()), Instant::now());
        Ok(())
    }
}
