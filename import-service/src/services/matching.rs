//! Confidence-scored reconciliation of ledger transactions against open
//! installments, supporting 1:1 and N:1 matches.

use crate::config::MatchingConfig;
use crate::models::{
    AmbiguousCandidate, CandidateReason, DateWindow, LedgerTransaction, MatchMethod,
    OpenInstallment, ReconcileOutcome, ReconciliationLink,
};
use crate::services::metrics::{record_reconciliation_candidate, record_reconciliation_link};
use crate::stores::LedgerStore;
use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Two candidate groupings scoring within this distance are treated as
/// equally good.
const CONFIDENCE_EPSILON: f64 = 1e-9;

/// Near-misses scoring below this are not surfaced for review.
const CANDIDATE_FLOOR: f64 = 0.35;

/// Bounds on the N:1 subset search.
const MAX_SEARCH_NODES: usize = 10_000;
const MAX_SUBSETS: usize = 64;

/// Scores one grouping of transactions against an installment. The engine
/// only depends on this trait, so a learned scorer can replace the
/// rule-based one without changing the reconcile contract.
pub trait MatchScorer: Send + Sync {
    fn score(&self, transactions: &[&LedgerTransaction], installment: &OpenInstallment) -> f64;
}

/// Deterministic scorer: amount closeness, date proximity against the due
/// date, and a wallet/payment-channel hint, weighted 0.6/0.3/0.1.
pub struct RuleScorer {
    amount_tolerance: Decimal,
    date_window_days: i64,
}

impl RuleScorer {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            amount_tolerance: Decimal::new(config.amount_tolerance_cents as i64, 2),
            date_window_days: config.date_window_days.max(1),
        }
    }
}

impl MatchScorer for RuleScorer {
    fn score(&self, transactions: &[&LedgerTransaction], installment: &OpenInstallment) -> f64 {
        if transactions.is_empty() {
            return 0.0;
        }

        let summed: Decimal = transactions.iter().map(|t| t.amount).sum();
        let diff = (installment.amount - summed).abs();
        let amount_score = if diff <= self.amount_tolerance {
            1.0
        } else {
            let denom = installment.amount.abs().max(summed.abs());
            if denom.is_zero() {
                0.0
            } else {
                (1.0 - (diff / denom).to_f64().unwrap_or(1.0)).max(0.0)
            }
        };

        // The farthest member of the group governs date proximity.
        let days = transactions
            .iter()
            .map(|t| (t.date - installment.due_date).num_days().abs())
            .max()
            .unwrap_or(0);
        let date_score = (1.0 - days as f64 / (self.date_window_days as f64 * 2.0)).max(0.0);

        let hinted = transactions.iter().any(|t| {
            (t.wallet_id.is_some() && t.wallet_id == installment.wallet_id)
                || (t.channel.is_some() && t.channel == installment.channel)
        });
        let hint_score = if hinted { 1.0 } else { 0.0 };

        amount_score * 0.6 + date_score * 0.3 + hint_score * 0.1
    }
}

struct Grouping {
    transaction_ids: Vec<Uuid>,
    confidence: f64,
    within_tolerance: bool,
    tied: bool,
}

/// Links unmatched ledger transactions to open installments within a date
/// window.
pub struct ReconciliationEngine {
    config: MatchingConfig,
    ledger: Arc<dyn LedgerStore>,
    scorer: Arc<dyn MatchScorer>,
}

impl ReconciliationEngine {
    pub fn new(
        config: MatchingConfig,
        ledger: Arc<dyn LedgerStore>,
        scorer: Arc<dyn MatchScorer>,
    ) -> Self {
        Self { config, ledger, scorer }
    }

    /// Scans the window and links what can be linked automatically.
    /// Everything below the confidence threshold, or tied between equally
    /// good groupings, is returned for manual review instead. Callers with
    /// too few manually confirmed links are refused (`model_ready: false`)
    /// rather than given low-quality links.
    pub async fn reconcile(
        &self,
        user_id: Uuid,
        window: DateWindow,
        wallet_id: Option<Uuid>,
    ) -> Result<ReconcileOutcome, AppError> {
        let confirmed = self.ledger.manual_link_count(user_id).await?;
        if confirmed < self.config.min_confirmed_links {
            tracing::info!(
                user_id = %user_id,
                confirmed,
                required = self.config.min_confirmed_links,
                "Skipping automatic reconciliation, not enough confirmed history"
            );
            return Ok(ReconcileOutcome {
                model_ready: false,
                reason: Some(format!(
                    "{} manually confirmed links on record, {} required before automatic matching",
                    confirmed, self.config.min_confirmed_links
                )),
                matched: Vec::new(),
                candidates: Vec::new(),
            });
        }

        let transactions = self
            .ledger
            .unlinked_transactions(user_id, window, wallet_id)
            .await?;
        let installments = self
            .ledger
            .open_installments(user_id, window, wallet_id)
            .await?;

        tracing::info!(
            user_id = %user_id,
            transactions = transactions.len(),
            installments = installments.len(),
            "Reconciliation window loaded"
        );

        let mut consumed: HashSet<Uuid> = HashSet::new();
        let mut matched: Vec<ReconciliationLink> = Vec::new();
        let mut candidates: Vec<AmbiguousCandidate> = Vec::new();

        for installment in &installments {
            let available: Vec<&LedgerTransaction> = transactions
                .iter()
                .filter(|t| !consumed.contains(&t.transaction_id))
                .filter(|t| t.amount.is_sign_positive() && !t.amount.is_zero())
                .collect();
            if available.is_empty() {
                break;
            }

            let Some(grouping) = self.best_grouping(&available, installment) else {
                continue;
            };

            if grouping.tied {
                record_reconciliation_candidate(CandidateReason::TiedBest.as_str());
                candidates.push(AmbiguousCandidate {
                    installment_id: installment.installment_id,
                    transaction_ids: grouping.transaction_ids,
                    confidence: grouping.confidence,
                    reason: CandidateReason::TiedBest,
                });
                continue;
            }

            if !grouping.within_tolerance || grouping.confidence < self.config.auto_threshold {
                record_reconciliation_candidate(CandidateReason::BelowThreshold.as_str());
                candidates.push(AmbiguousCandidate {
                    installment_id: installment.installment_id,
                    transaction_ids: grouping.transaction_ids,
                    confidence: grouping.confidence,
                    reason: CandidateReason::BelowThreshold,
                });
                continue;
            }

            consumed.extend(grouping.transaction_ids.iter().copied());
            record_reconciliation_link(MatchMethod::Automatic.as_str());
            tracing::debug!(
                installment_id = %installment.installment_id,
                group_size = grouping.transaction_ids.len(),
                confidence = grouping.confidence,
                "Automatic link proposed"
            );
            matched.push(ReconciliationLink {
                link_id: Uuid::new_v4(),
                transaction_ids: grouping.transaction_ids,
                installment_id: installment.installment_id,
                confidence: grouping.confidence,
                method: MatchMethod::Automatic,
                created_utc: Utc::now(),
            });
        }

        if !matched.is_empty() {
            self.ledger.persist_links(user_id, &matched).await?;
        }

        tracing::info!(
            user_id = %user_id,
            matched = matched.len(),
            candidates = candidates.len(),
            "Reconciliation completed"
        );

        Ok(ReconcileOutcome { model_ready: true, reason: None, matched, candidates })
    }

    /// Best grouping for one installment: among subsets whose sum lands
    /// within tolerance, the highest-confidence one; ties are flagged. When
    /// nothing sums close enough, the closest single transaction is offered
    /// for review.
    fn best_grouping(
        &self,
        available: &[&LedgerTransaction],
        installment: &OpenInstallment,
    ) -> Option<Grouping> {
        let tolerance = Decimal::new(self.config.amount_tolerance_cents as i64, 2);
        let subsets = subsets_within_tolerance(
            available,
            installment.amount,
            tolerance,
            self.config.max_group_size.max(1),
        );

        if subsets.is_empty() {
            return self.closest_single(available, installment);
        }

        let mut scored: Vec<(Vec<usize>, Decimal, f64)> = subsets
            .into_iter()
            .map(|indices| {
                let group: Vec<&LedgerTransaction> =
                    indices.iter().map(|&i| available[i]).collect();
                let summed: Decimal = group.iter().map(|t| t.amount).sum();
                let diff = (installment.amount - summed).abs();
                let confidence = self.scorer.score(&group, installment);
                (indices, diff, confidence)
            })
            .collect();

        // Closest summed amount wins; confidence breaks distance ties.
        scored.sort_by(|a, b| {
            a.1.cmp(&b.1).then_with(|| {
                b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)
            })
        });

        let tied = scored.len() > 1
            && scored[0].1 == scored[1].1
            && (scored[0].2 - scored[1].2).abs() < CONFIDENCE_EPSILON;

        let (indices, _, confidence) = scored.swap_remove(0);
        Some(Grouping {
            transaction_ids: indices
                .into_iter()
                .map(|i| available[i].transaction_id)
                .collect(),
            confidence,
            within_tolerance: true,
            tied,
        })
    }

    fn closest_single(
        &self,
        available: &[&LedgerTransaction],
        installment: &OpenInstallment,
    ) -> Option<Grouping> {
        let nearest = available.iter().min_by(|a, b| {
            let da = (a.amount - installment.amount).abs();
            let db = (b.amount - installment.amount).abs();
            da.cmp(&db).then_with(|| {
                let ta = (a.date - installment.due_date).num_days().abs();
                let tb = (b.date - installment.due_date).num_days().abs();
                ta.cmp(&tb)
            })
        })?;

        let confidence = self.scorer.score(&[nearest], installment);
        if confidence < CANDIDATE_FLOOR {
            return None;
        }

        Some(Grouping {
            transaction_ids: vec![nearest.transaction_id],
            confidence,
            within_tolerance: false,
            tied: false,
        })
    }
}

/// Enumerates transaction subsets (up to `max_size` members) whose summed
/// amount lands within `tolerance` of `target`. The search walks amounts in
/// ascending order and prunes once a partial sum overshoots, bounded by
/// `MAX_SEARCH_NODES` visited nodes and `MAX_SUBSETS` results.
fn subsets_within_tolerance(
    transactions: &[&LedgerTransaction],
    target: Decimal,
    tolerance: Decimal,
    max_size: usize,
) -> Vec<Vec<usize>> {
    let mut order: Vec<usize> = (0..transactions.len()).collect();
    order.sort_by(|&a, &b| transactions[a].amount.cmp(&transactions[b].amount));

    let mut found = Vec::new();
    let mut current = Vec::new();
    let mut visited = 0usize;
    extend_subset(
        transactions,
        &order,
        0,
        target,
        tolerance,
        max_size,
        Decimal::ZERO,
        &mut current,
        &mut found,
        &mut visited,
    );
    if visited >= MAX_SEARCH_NODES {
        tracing::debug!(target = %target, "Subset search truncated at node limit");
    }
    found
}

#[allow(clippy::too_many_arguments)]
fn extend_subset(
    transactions: &[&LedgerTransaction],
    order: &[usize],
    start: usize,
    target: Decimal,
    tolerance: Decimal,
    max_size: usize,
    sum: Decimal,
    current: &mut Vec<usize>,
    found: &mut Vec<Vec<usize>>,
    visited: &mut usize,
) {
    for pos in start..order.len() {
        if *visited >= MAX_SEARCH_NODES || found.len() >= MAX_SUBSETS {
            return;
        }
        *visited += 1;

        let index = order[pos];
        let next_sum = sum + transactions[index].amount;
        // Ascending order: every later amount overshoots as well.
        if next_sum - target > tolerance {
            return;
        }

        current.push(index);
        if (target - next_sum).abs() <= tolerance {
            found.push(current.clone());
        }
        if current.len() < max_size {
            extend_subset(
                transactions,
                order,
                pos + 1,
                target,
                tolerance,
                max_size,
                next_sum,
                current,
                found,
                visited,
            );
        }
        current.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn txn(amount: &str, on: &str) -> LedgerTransaction {
        LedgerTransaction {
            transaction_id: Uuid::new_v4(),
            wallet_id: None,
            amount: dec(amount),
            date: date(on),
            description: "deposit".to_string(),
            channel: None,
            reconciliation: None,
        }
    }

    fn installment(amount: &str, due: &str) -> OpenInstallment {
        OpenInstallment {
            sale_id: Uuid::new_v4(),
            installment_id: Uuid::new_v4(),
            number: 1,
            amount: dec(amount),
            due_date: date(due),
            wallet_id: None,
            channel: None,
        }
    }

    fn scorer() -> RuleScorer {
        RuleScorer::new(&MatchingConfig::default())
    }

    #[test]
    fn test_exact_same_day_match_scores_high() {
        let t = txn("150.00", "2024-03-10");
        let score = scorer().score(&[&t], &installment("150.00", "2024-03-10"));
        assert!(score >= 0.9, "score was {}", score);
    }

    #[test]
    fn test_amount_within_one_cent_is_exact() {
        let t = txn("149.99", "2024-03-10");
        let score = scorer().score(&[&t], &installment("150.00", "2024-03-10"));
        assert!(score >= 0.9, "score was {}", score);
    }

    #[test]
    fn test_distant_date_lowers_score() {
        let near = txn("150.00", "2024-03-10");
        let far = txn("150.00", "2024-03-24");
        let target = installment("150.00", "2024-03-10");
        let s = scorer();
        assert!(s.score(&[&near], &target) > s.score(&[&far], &target));
    }

    #[test]
    fn test_channel_hint_raises_score() {
        let mut hinted = txn("150.00", "2024-03-10");
        hinted.channel = Some("pix".to_string());
        let plain = txn("150.00", "2024-03-10");
        let mut target = installment("150.00", "2024-03-10");
        target.channel = Some("pix".to_string());
        let s = scorer();
        assert!(s.score(&[&hinted], &target) > s.score(&[&plain], &target));
    }

    #[test]
    fn test_subset_search_finds_pair_summing_to_target() {
        let a = txn("75.00", "2024-03-09");
        let b = txn("75.00", "2024-03-11");
        let c = txn("20.00", "2024-03-10");
        let pool = vec![&a, &b, &c];
        let subsets = subsets_within_tolerance(&pool, dec("150.00"), dec("0.01"), 4);
        assert_eq!(subsets.len(), 1);
        assert_eq!(subsets[0].len(), 2);
    }

    #[test]
    fn test_subset_search_respects_group_size() {
        let a = txn("50.00", "2024-03-09");
        let b = txn("50.00", "2024-03-10");
        let c = txn("50.00", "2024-03-11");
        let pool = vec![&a, &b, &c];
        assert!(subsets_within_tolerance(&pool, dec("150.00"), dec("0.01"), 2).is_empty());
        assert_eq!(
            subsets_within_tolerance(&pool, dec("150.00"), dec("0.01"), 3).len(),
            1
        );
    }

    #[test]
    fn test_subset_search_outside_tolerance_is_empty() {
        let a = txn("149.00", "2024-03-10");
        let pool = vec![&a];
        assert!(subsets_within_tolerance(&pool, dec("150.00"), dec("0.01"), 4).is_empty());
    }
}
