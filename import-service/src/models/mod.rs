//! Domain models for import-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Import Job Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportCounters {
    pub total: u64,
    pub imported: u64,
    pub skipped: u64,
    pub error: u64,
}

impl ImportCounters {
    /// Items accounted for so far, in any outcome.
    pub fn processed(&self) -> u64 {
        self.imported + self.skipped + self.error
    }

    /// Additive update: every field is current + delta.
    pub fn add(&mut self, delta: &ImportCounters) {
        self.total += delta.total;
        self.imported += delta.imported;
        self.skipped += delta.skipped;
        self.error += delta.error;
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.imported == 0 && self.skipped == 0 && self.error == 0
    }
}

/// One tracked import run. Mutated only by its own tracker; immutable once
/// the status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub job_id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub wallet_id: Option<Uuid>,
    pub status: JobStatus,
    pub started_utc: DateTime<Utc>,
    pub ended_utc: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub counters: ImportCounters,
}

impl ImportJob {
    pub fn new(source: &str, user_id: Uuid, wallet_id: Option<Uuid>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            user_id,
            source: source.to_string(),
            wallet_id,
            status: JobStatus::Pending,
            started_utc: Utc::now(),
            ended_utc: None,
            duration_seconds: None,
            counters: ImportCounters::default(),
        }
    }

    /// User-facing outcome line, valid for any status including partial
    /// failures.
    pub fn outcome_summary(&self) -> String {
        format!(
            "{} of {} imported, {} skipped, {} failed",
            self.counters.imported, self.counters.total, self.counters.skipped, self.counters.error
        )
    }
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub source: Option<String>,
}

// ============================================================================
// Sale and Installment Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Canceled,
    Overdue,
}

impl InstallmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Canceled => "canceled",
            Self::Overdue => "overdue",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "paid" => Self::Paid,
            "canceled" => Self::Canceled,
            "overdue" => Self::Overdue,
            _ => Self::Pending,
        }
    }

    /// Still expects money to arrive.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Installment {
    pub installment_id: Uuid,
    pub number: u32,
    pub total_count: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub status: InstallmentStatus,
}

/// A sale with its payment plan. Invariant: installment amounts sum to
/// `total_amount` cent-exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleRecord {
    pub sale_id: Uuid,
    pub customer: String,
    pub total_amount: Decimal,
    pub wallet_id: Option<Uuid>,
    pub channel: Option<String>,
    pub installments: Vec<Installment>,
}

impl SaleRecord {
    pub fn installments_total(&self) -> Decimal {
        self.installments.iter().map(|i| i.amount).sum()
    }
}

// ============================================================================
// Cash Flow Prediction Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionSource {
    Installment,
    Recurring,
    Manual,
    Imported,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installment => "installment",
            Self::Recurring => "recurring",
            Self::Manual => "manual",
            Self::Imported => "imported",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowPredictionEntry {
    pub amount: Decimal,
    pub date: NaiveDate,
    pub probability: f64,
    pub source: PredictionSource,
}

// ============================================================================
// Ledger Transaction Models
// ============================================================================

/// Reconciliation metadata carried by a linked transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationMeta {
    pub linked_sale_id: Option<Uuid>,
    pub linked_installment_id: Option<Uuid>,
    pub confidence: f64,
    pub is_manual: bool,
    pub is_part_of_group: bool,
    pub group_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub transaction_id: Uuid,
    pub wallet_id: Option<Uuid>,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
    pub channel: Option<String>,
    pub reconciliation: Option<ReconciliationMeta>,
}

impl LedgerTransaction {
    pub fn is_linked(&self) -> bool {
        self.reconciliation.is_some()
    }
}

// ============================================================================
// Reconciliation Models
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Automatic,
    Manual,
}

impl MatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "automatic" => Self::Automatic,
            "manual" => Self::Manual,
            _ => Self::Manual,
        }
    }
}

/// A confirmed link between one or more transactions and a single
/// installment. Several transaction ids make an N:1 match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLink {
    pub link_id: Uuid,
    pub transaction_ids: Vec<Uuid>,
    pub installment_id: Uuid,
    pub confidence: f64,
    pub method: MatchMethod,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    BelowThreshold,
    TiedBest,
}

impl CandidateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelowThreshold => "below_threshold",
            Self::TiedBest => "tied_best",
        }
    }
}

/// A pairing the matcher refuses to link automatically; surfaced for manual
/// review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguousCandidate {
    pub installment_id: Uuid,
    pub transaction_ids: Vec<Uuid>,
    pub confidence: f64,
    pub reason: CandidateReason,
}

/// An installment still waiting for money, as seen by the matcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenInstallment {
    pub sale_id: Uuid,
    pub installment_id: Uuid,
    pub number: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
    pub wallet_id: Option<Uuid>,
    pub channel: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub model_ready: bool,
    pub reason: Option<String>,
    pub matched: Vec<ReconciliationLink>,
    pub candidates: Vec<AmbiguousCandidate>,
}

// ============================================================================
// External Record Models
// ============================================================================

/// Inclusive date range, day granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalInstallment {
    pub number: u32,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSale {
    pub external_id: String,
    pub customer: String,
    pub total_amount: Decimal,
    pub sale_date: NaiveDate,
    pub description: String,
    pub channel: Option<String>,
    pub installment_count: u32,
    pub first_due_date: NaiveDate,
    /// Explicit per-installment amounts and dates; may be empty, in which
    /// case the schedule is derived from `total_amount` and
    /// `installment_count`.
    pub installments: Vec<ExternalInstallment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTransaction {
    pub external_id: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: String,
    pub channel: Option<String>,
}

/// One raw record as fetched from a third-party bookkeeping system.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExternalRecord {
    Sale(ExternalSale),
    Transaction(ExternalTransaction),
}

impl ExternalRecord {
    pub fn external_id(&self) -> &str {
        match self {
            Self::Sale(s) => &s.external_id,
            Self::Transaction(t) => &t.external_id,
        }
    }

    pub fn amount(&self) -> Decimal {
        match self {
            Self::Sale(s) => s.total_amount,
            Self::Transaction(t) => t.amount,
        }
    }

    pub fn date(&self) -> NaiveDate {
        match self {
            Self::Sale(s) => s.sale_date,
            Self::Transaction(t) => t.date,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Sale(s) => &s.description,
            Self::Transaction(t) => &t.description,
        }
    }

    /// The stable text used for fingerprinting: the external id when the
    /// source provides one, otherwise the description.
    pub fn descriptor(&self) -> &str {
        let id = self.external_id();
        if id.trim().is_empty() {
            self.description()
        } else {
            id
        }
    }
}

/// One page of fetched records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<ExternalRecord>,
    pub next_page: Option<u32>,
}
