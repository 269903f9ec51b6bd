//! Stable idempotency keys for external records.

use crate::models::ExternalRecord;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

/// Builds the canonical fingerprint of a record's stable fields: amount at
/// cent precision, date at day granularity, and a normalized descriptor.
/// Identical resubmission yields an identical key; the key is checked against
/// the seen-set best-effort, with the persistence layer's uniqueness
/// constraint as the real guarantee.
pub fn record_fingerprint(amount: Decimal, date: NaiveDate, descriptor: &str) -> String {
    let mut cents = amount.round_dp(2);
    cents.rescale(2);

    let canonical = format!(
        "{}|{}|{}",
        cents,
        date.format("%Y-%m-%d"),
        normalize_descriptor(descriptor)
    );

    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Case-folds and collapses whitespace so cosmetic differences in source
/// exports do not change identity.
fn normalize_descriptor(descriptor: &str) -> String {
    descriptor
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

impl ExternalRecord {
    /// Idempotency key for this record.
    pub fn fingerprint(&self) -> String {
        record_fingerprint(self.amount(), self.date(), self.descriptor())
    }
}
