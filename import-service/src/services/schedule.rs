//! Expands installment plans into schedules and predicted cash-flow entries.

use crate::models::{
    CashFlowPredictionEntry, ExternalInstallment, Installment, InstallmentStatus, PredictionSource,
    SaleRecord,
};
use chrono::{Months, NaiveDate};
use rust_decimal::{Decimal, RoundingStrategy};

/// Splits a total into `count` cent-exact parts. Every part gets the
/// truncated even share; the rounding remainder lands entirely on the last
/// part, so the parts always sum to the (cent-rounded) total.
pub fn split_amount(total: Decimal, count: u32) -> Vec<Decimal> {
    if count == 0 {
        return Vec::new();
    }

    let total = total.round_dp(2);
    let base = (total / Decimal::from(count))
        .round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let mut amounts = vec![base; count as usize - 1];
    amounts.push(total - base * Decimal::from(count - 1));
    amounts
}

/// Materializes the installment rows for a sale. Explicit installments pass
/// through unchanged; otherwise the schedule is derived from the total and
/// count, due dates advancing monthly from `first_due_date`.
pub fn build_installments(
    total_amount: Decimal,
    explicit: &[ExternalInstallment],
    count: u32,
    first_due_date: NaiveDate,
) -> Vec<Installment> {
    if !explicit.is_empty() {
        let total_count = explicit.len() as u32;
        return explicit
            .iter()
            .map(|i| Installment {
                installment_id: uuid::Uuid::new_v4(),
                number: i.number,
                total_count,
                amount: i.amount.round_dp(2),
                due_date: i.due_date,
                status: InstallmentStatus::Pending,
            })
            .collect();
    }

    split_amount(total_amount, count)
        .into_iter()
        .enumerate()
        .map(|(i, amount)| Installment {
            installment_id: uuid::Uuid::new_v4(),
            number: i as u32 + 1,
            total_count: count,
            amount,
            due_date: first_due_date
                .checked_add_months(Months::new(i as u32))
                .unwrap_or(first_due_date),
            status: InstallmentStatus::Pending,
        })
        .collect()
}

/// One predicted cash-flow entry per installment, probability 1.0, tagged as
/// an installment prediction. Speculative/recurring predictions come from
/// elsewhere with lower probabilities.
pub fn expand_sale(sale: &SaleRecord) -> Vec<CashFlowPredictionEntry> {
    sale.installments
        .iter()
        .map(|i| CashFlowPredictionEntry {
            amount: i.amount,
            date: i.due_date,
            probability: 1.0,
            source: PredictionSource::Installment,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use uuid::Uuid;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::from_str(s).unwrap()
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_split_is_cent_exact_with_remainder_on_last() {
        let parts = split_amount(dec("100.00"), 3);
        assert_eq!(parts, vec![dec("33.33"), dec("33.33"), dec("33.34")]);
        assert_eq!(parts.iter().sum::<Decimal>(), dec("100.00"));
    }

    #[test]
    fn test_split_even_total_has_equal_parts() {
        let parts = split_amount(dec("150.00"), 2);
        assert_eq!(parts, vec![dec("75.00"), dec("75.00")]);
    }

    #[test]
    fn test_split_single_part_keeps_total() {
        assert_eq!(split_amount(dec("19.99"), 1), vec![dec("19.99")]);
    }

    #[test]
    fn test_split_zero_count_is_empty() {
        assert!(split_amount(dec("10.00"), 0).is_empty());
    }

    #[test]
    fn test_build_installments_advances_monthly() {
        let rows = build_installments(dec("300.00"), &[], 3, date("2024-01-31"));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].due_date, date("2024-01-31"));
        assert_eq!(rows[1].due_date, date("2024-02-29"));
        assert_eq!(rows[2].due_date, date("2024-03-31"));
        assert_eq!(rows.iter().map(|i| i.amount).sum::<Decimal>(), dec("300.00"));
    }

    #[test]
    fn test_build_installments_passes_explicit_rows_through() {
        let explicit = vec![
            ExternalInstallment { number: 1, amount: dec("60.00"), due_date: date("2024-02-01") },
            ExternalInstallment { number: 2, amount: dec("40.00"), due_date: date("2024-03-01") },
        ];
        let rows = build_installments(dec("100.00"), &explicit, 2, date("2024-02-01"));
        assert_eq!(rows[0].amount, dec("60.00"));
        assert_eq!(rows[1].amount, dec("40.00"));
        assert_eq!(rows[1].due_date, date("2024-03-01"));
    }

    #[test]
    fn test_expand_sale_emits_one_entry_per_installment() {
        let sale = SaleRecord {
            sale_id: Uuid::new_v4(),
            customer: "acme".to_string(),
            total_amount: dec("100.00"),
            wallet_id: None,
            channel: None,
            installments: build_installments(dec("100.00"), &[], 3, date("2024-01-15")),
        };
        let entries = expand_sale(&sale);
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.probability == 1.0));
        assert!(entries
            .iter()
            .all(|e| e.source == PredictionSource::Installment));
        assert_eq!(entries.iter().map(|e| e.amount).sum::<Decimal>(), dec("100.00"));
    }
}
