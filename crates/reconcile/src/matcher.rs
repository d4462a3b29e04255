use std::collections::HashSet;

use cartledger_core::{Money, Order, Provider, Transaction};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchError {
    #[error("No expected charge amounts given")]
    NoExpectedAmounts,
    #[error("Expected charge #{index} must be positive, got {amount}")]
    InvalidExpectedAmount { index: usize, amount: Money },
    #[error("No matches to validate")]
    NoMatchesToValidate,
    #[error("Charge sum does not match order total: expected {expected}, charges sum to {actual}")]
    ChargeSumMismatch { expected: Money, actual: Money },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    pub amount_tolerance: Money,
    pub date_tolerance_days: i64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            amount_tolerance: Money::from_cents(1),
            date_tolerance_days: 5,
        }
    }
}

impl MatcherConfig {
    pub fn for_provider(provider: Provider) -> Self {
        match provider {
            // Amazon totals drift from the card charge more than the others.
            Provider::Amazon => Self {
                amount_tolerance: Money::from_cents(50),
                date_tolerance_days: 7,
            },
            Provider::Walmart | Provider::Costco => Self::default(),
        }
    }
}

/// A candidate that cleared both tolerances.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult<'a> {
    pub transaction: &'a Transaction,
    /// Transaction date minus order date, in days.
    pub date_diff_days: i64,
    /// `| |amount| - target |`
    pub amount_diff: Money,
}

/// One slot per expected charge; unfilled slots stay `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiMatchResult<'a> {
    pub matches: Vec<Option<MatchResult<'a>>>,
    pub all_found: bool,
}

impl<'a> MultiMatchResult<'a> {
    pub fn found(&self) -> impl Iterator<Item = &MatchResult<'a>> {
        self.matches.iter().flatten()
    }

    pub fn missing_slots(&self) -> Vec<usize> {
        self.matches
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn transactions(&self) -> Vec<&'a Transaction> {
        self.found().map(|m| m.transaction).collect()
    }
}

/// Transaction ids already claimed during one sync run.
#[derive(Debug, Clone, Default)]
pub struct UsedTransactions(HashSet<String>);

impl UsedTransactions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns `false` if the id was already claimed.
    pub fn mark(&mut self, id: &str) -> bool {
        self.0.insert(id.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Matcher {
    pub config: MatcherConfig,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Best unclaimed transaction for the order total. `None` means the
    /// charge has not posted yet. Never touches `used`.
    pub fn find_match<'a>(
        &self,
        order: &Order,
        candidates: &'a [Transaction],
        used: &UsedTransactions,
    ) -> Option<MatchResult<'a>> {
        let best = self.best_candidate(order.date, order.total, candidates, |tx| {
            used.contains(&tx.id)
        });
        match &best {
            Some(m) => tracing::debug!(
                order_id = %order.id,
                transaction_id = %m.transaction.id,
                date_diff = m.date_diff_days,
                amount_diff = %m.amount_diff,
                "matched order"
            ),
            None => tracing::debug!(order_id = %order.id, total = %order.total, "no candidate within tolerance"),
        }
        best
    }

    /// Matches each expected charge of a split-shipment order to its own
    /// transaction. A transaction fills at most one slot.
    pub fn find_multiple_matches<'a>(
        &self,
        order: &Order,
        candidates: &'a [Transaction],
        used: &UsedTransactions,
        expected_amounts: &[Money],
    ) -> Result<MultiMatchResult<'a>, MatchError> {
        if expected_amounts.is_empty() {
            return Err(MatchError::NoExpectedAmounts);
        }
        if let Some((index, &amount)) = expected_amounts
            .iter()
            .enumerate()
            .find(|(_, a)| !a.is_positive())
        {
            return Err(MatchError::InvalidExpectedAmount { index, amount });
        }

        let mut claimed: HashSet<&str> = HashSet::new();
        let mut matches = Vec::with_capacity(expected_amounts.len());

        for &amount in expected_amounts {
            let slot = self.best_candidate(order.date, amount, candidates, |tx| {
                used.contains(&tx.id) || claimed.contains(tx.id.as_str())
            });
            if let Some(m) = &slot {
                claimed.insert(m.transaction.id.as_str());
            } else {
                tracing::debug!(order_id = %order.id, %amount, "no transaction for expected charge");
            }
            matches.push(slot);
        }

        let filled: Vec<MatchResult<'a>> = matches.iter().flatten().copied().collect();
        let all_found = if filled.len() == expected_amounts.len() {
            validate_multi_match(&filled, order.total, self.config.amount_tolerance)?;
            true
        } else {
            false
        };

        Ok(MultiMatchResult { matches, all_found })
    }

    /// First candidate wins remaining ties, so results follow input order.
    fn best_candidate<'a, F>(
        &self,
        date: NaiveDate,
        target: Money,
        candidates: &'a [Transaction],
        excluded: F,
    ) -> Option<MatchResult<'a>>
    where
        F: Fn(&Transaction) -> bool,
    {
        candidates
            .iter()
            .filter(|tx| !excluded(tx))
            .filter_map(|tx| self.score(date, target, tx))
            .min_by_key(|m| (m.date_diff_days.abs(), m.amount_diff))
    }

    fn score<'a>(&self, date: NaiveDate, target: Money, tx: &'a Transaction) -> Option<MatchResult<'a>> {
        let amount_diff = (tx.amount.abs() - target).abs();
        if amount_diff > self.config.amount_tolerance {
            return None;
        }

        let date_diff_days = (tx.date - date).num_days();
        if date_diff_days.abs() > self.config.date_tolerance_days {
            return None;
        }

        Some(MatchResult {
            transaction: tx,
            date_diff_days,
            amount_diff,
        })
    }
}

/// Checks that the matched charges add up to the order total.
pub fn validate_multi_match(
    matches: &[MatchResult<'_>],
    order_total: Money,
    tolerance: Money,
) -> Result<(), MatchError> {
    if matches.is_empty() {
        return Err(MatchError::NoMatchesToValidate);
    }
    let actual: Money = matches.iter().map(|m| m.transaction.amount.abs()).sum();
    if actual.within(order_total, tolerance) {
        Ok(())
    } else {
        Err(MatchError::ChargeSumMismatch {
            expected: order_total,
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartledger_core::OrderKind;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tx(id: &str, day: u32, cents: i64) -> Transaction {
        Transaction::new(id, Money::from_cents(cents), date(2024, 3, day), "WALMART.COM")
    }

    fn order(day: u32, total_cents: i64) -> Order {
        Order {
            id: "order-1".to_string(),
            provider: Provider::Walmart,
            date: date(2024, 3, day),
            total: Money::from_cents(total_cents),
            subtotal: Money::from_cents(total_cents),
            tax: Money::zero(),
            tip: Money::zero(),
            fees: Money::zero(),
            items: vec![],
            kind: OrderKind::Simple,
        }
    }

    #[test]
    fn exact_match_same_date_and_amount() {
        let matcher = Matcher::default();
        let txs = vec![tx("t1", 10, -4999)];
        let m = matcher.find_match(&order(10, 4999), &txs, &UsedTransactions::new()).unwrap();
        assert_eq!(m.transaction.id, "t1");
        assert_eq!(m.date_diff_days, 0);
        assert_eq!(m.amount_diff, Money::zero());
    }

    #[test]
    fn match_at_tolerance_edges() {
        let matcher = Matcher::default(); // $0.01, 5 days
        let txs = vec![tx("t1", 15, -5000)];
        // 5 days and one cent off: still inside both windows.
        let m = matcher.find_match(&order(10, 4999), &txs, &UsedTransactions::new());
        assert!(m.is_some());
        assert_eq!(m.unwrap().date_diff_days, 5);
    }

    #[test]
    fn no_match_outside_amount_tolerance() {
        let matcher = Matcher::default();
        let txs = vec![tx("t1", 10, -5002)];
        assert!(matcher.find_match(&order(10, 5000), &txs, &UsedTransactions::new()).is_none());
    }

    #[test]
    fn no_match_outside_date_window() {
        let matcher = Matcher::default();
        let txs = vec![tx("t1", 16, -5000)];
        assert!(matcher.find_match(&order(10, 5000), &txs, &UsedTransactions::new()).is_none());
        let early = vec![tx("t2", 4, -5000)];
        assert!(matcher.find_match(&order(10, 5000), &early, &UsedTransactions::new()).is_none());
    }

    #[test]
    fn closer_date_wins_over_closer_amount() {
        let matcher = Matcher::new(MatcherConfig {
            amount_tolerance: Money::from_cents(50),
            date_tolerance_days: 5,
        });
        let txs = vec![tx("exact-amount", 13, -5000), tx("near-date", 11, -5030)];
        let m = matcher.find_match(&order(10, 5000), &txs, &UsedTransactions::new()).unwrap();
        assert_eq!(m.transaction.id, "near-date");
    }

    #[test]
    fn amount_breaks_date_ties() {
        let matcher = Matcher::new(MatcherConfig {
            amount_tolerance: Money::from_cents(50),
            date_tolerance_days: 5,
        });
        let txs = vec![tx("off", 12, -5020), tx("closer", 8, -5005)];
        let m = matcher.find_match(&order(10, 5000), &txs, &UsedTransactions::new()).unwrap();
        assert_eq!(m.transaction.id, "closer");
        assert_eq!(m.date_diff_days, -2);
    }

    #[test]
    fn full_ties_keep_input_order() {
        let matcher = Matcher::default();
        let txs = vec![tx("first", 11, -5000), tx("second", 9, -5000)];
        for _ in 0..3 {
            let m = matcher.find_match(&order(10, 5000), &txs, &UsedTransactions::new()).unwrap();
            assert_eq!(m.transaction.id, "first");
        }
    }

    #[test]
    fn used_transactions_are_never_returned() {
        let matcher = Matcher::default();
        let txs = vec![tx("t1", 10, -5000), tx("t2", 12, -5000)];
        let mut used = UsedTransactions::new();
        assert!(used.mark("t1"));
        let m = matcher.find_match(&order(10, 5000), &txs, &used).unwrap();
        assert_eq!(m.transaction.id, "t2");
        used.mark("t2");
        assert!(matcher.find_match(&order(10, 5000), &txs, &used).is_none());
    }

    #[test]
    fn find_does_not_mark_used() {
        let matcher = Matcher::default();
        let txs = vec![tx("t1", 10, -5000)];
        let used = UsedTransactions::new();
        matcher.find_match(&order(10, 5000), &txs, &used).unwrap();
        assert!(used.is_empty());
    }

    #[test]
    fn refunds_match_on_magnitude() {
        let matcher = Matcher::default();
        let txs = vec![tx("refund", 10, 2500)];
        assert!(matcher.find_match(&order(10, 2500), &txs, &UsedTransactions::new()).is_some());
    }

    #[test]
    fn multi_match_split_shipment() {
        let matcher = Matcher::default();
        let txs = vec![tx("a", 11, -11867), tx("b", 13, -831), tx("noise", 12, -4000)];
        let amounts = [Money::from_cents(11867), Money::from_cents(831)];
        let result = matcher
            .find_multiple_matches(&order(10, 12698), &txs, &UsedTransactions::new(), &amounts)
            .unwrap();
        assert!(result.all_found);
        let ids: Vec<&str> = result.transactions().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn multi_match_same_amount_claims_distinct_transactions() {
        let matcher = Matcher::default();
        let txs = vec![tx("a", 10, -2000), tx("b", 12, -2000)];
        let amounts = [Money::from_cents(2000), Money::from_cents(2000)];
        let result = matcher
            .find_multiple_matches(&order(10, 4000), &txs, &UsedTransactions::new(), &amounts)
            .unwrap();
        assert!(result.all_found);
        assert_eq!(result.matches[0].unwrap().transaction.id, "a");
        assert_eq!(result.matches[1].unwrap().transaction.id, "b");
    }

    #[test]
    fn multi_match_partial_keeps_slot_count() {
        let matcher = Matcher::default();
        let txs = vec![tx("a", 11, -11867)];
        let amounts = [Money::from_cents(831), Money::from_cents(11867)];
        let result = matcher
            .find_multiple_matches(&order(10, 12698), &txs, &UsedTransactions::new(), &amounts)
            .unwrap();
        assert!(!result.all_found);
        assert_eq!(result.matches.len(), 2);
        assert!(result.matches[0].is_none());
        assert_eq!(result.matches[1].unwrap().transaction.id, "a");
        assert_eq!(result.missing_slots(), vec![0]);
    }

    #[test]
    fn multi_match_skips_globally_used() {
        let matcher = Matcher::default();
        let txs = vec![tx("a", 11, -11867), tx("b", 13, -831)];
        let mut used = UsedTransactions::new();
        used.mark("b");
        let amounts = [Money::from_cents(11867), Money::from_cents(831)];
        let result = matcher
            .find_multiple_matches(&order(10, 12698), &txs, &used, &amounts)
            .unwrap();
        assert!(!result.all_found);
        assert!(result.matches[1].is_none());
    }

    #[test]
    fn multi_match_rejects_bad_amounts() {
        let matcher = Matcher::default();
        let used = UsedTransactions::new();
        assert_eq!(
            matcher.find_multiple_matches(&order(10, 100), &[], &used, &[]),
            Err(MatchError::NoExpectedAmounts)
        );
        assert_eq!(
            matcher.find_multiple_matches(
                &order(10, 100),
                &[],
                &used,
                &[Money::from_cents(100), Money::zero()]
            ),
            Err(MatchError::InvalidExpectedAmount {
                index: 1,
                amount: Money::zero()
            })
        );
        assert!(matches!(
            matcher.find_multiple_matches(&order(10, 100), &[], &used, &[Money::from_cents(-5)]),
            Err(MatchError::InvalidExpectedAmount { index: 0, .. })
        ));
    }

    #[test]
    fn multi_match_sum_mismatch_is_an_error() {
        let matcher = Matcher::default();
        let txs = vec![tx("a", 11, -10000), tx("b", 12, -2000)];
        let amounts = [Money::from_cents(10000), Money::from_cents(2000)];
        let err = matcher
            .find_multiple_matches(&order(10, 15000), &txs, &UsedTransactions::new(), &amounts)
            .unwrap_err();
        assert_eq!(
            err,
            MatchError::ChargeSumMismatch {
                expected: Money::from_cents(15000),
                actual: Money::from_cents(12000)
            }
        );
    }

    #[test]
    fn validate_rejects_empty() {
        assert_eq!(
            validate_multi_match(&[], Money::from_cents(100), Money::from_cents(1)),
            Err(MatchError::NoMatchesToValidate)
        );
    }

    #[test]
    fn validate_accepts_drift_within_tolerance() {
        let a = tx("a", 10, -3333);
        let b = tx("b", 10, -3334);
        let matches = [
            MatchResult { transaction: &a, date_diff_days: 0, amount_diff: Money::zero() },
            MatchResult { transaction: &b, date_diff_days: 0, amount_diff: Money::zero() },
        ];
        assert!(validate_multi_match(&matches, Money::from_cents(6666), Money::from_cents(1)).is_ok());
        assert!(validate_multi_match(&matches, Money::from_cents(6665), Money::from_cents(1)).is_err());
    }

    #[test]
    fn provider_defaults() {
        assert_eq!(MatcherConfig::for_provider(Provider::Amazon).amount_tolerance, Money::from_cents(50));
        assert_eq!(MatcherConfig::for_provider(Provider::Walmart), MatcherConfig::default());
    }
}
