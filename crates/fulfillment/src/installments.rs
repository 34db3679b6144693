//! Installment plan for receivables.

use chrono::{Days, NaiveDate};
use common::Money;
use serde::Serialize;

use crate::order::PaymentTerms;

/// One receivable to be created for an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Installment {
    /// 1-based installment number.
    pub number: u32,
    pub total: u32,
    pub amount: Money,
    pub due_date: NaiveDate,
}

/// Splits `total` by `terms`, with due dates counted from `issued_on`.
///
/// Amounts are split evenly in cents and the last installment absorbs the
/// remainder. Installment `n` falls due `first_due_days + (n - 1) *
/// interval_days` days after `issued_on`. Terms asking for zero installments
/// are treated as a single one.
pub fn plan(total: Money, terms: &PaymentTerms, issued_on: NaiveDate) -> Vec<Installment> {
    let count = terms.installments.max(1);
    total
        .split(count)
        .into_iter()
        .zip(1..=count)
        .map(|(amount, number)| {
            let offset = u64::from(terms.first_due_days)
                + u64::from(number - 1) * u64::from(terms.interval_days);
            Installment {
                number,
                total: count,
                amount,
                due_date: issued_on + Days::new(offset),
            }
        })
        .collect()
}
