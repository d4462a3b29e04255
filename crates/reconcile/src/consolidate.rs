use cartledger_core::{Order, Transaction, TransactionUpdate};
use serde::Serialize;
use thiserror::Error;

use crate::cancel::CancelSignal;
use crate::ledger::{LedgerClient, LedgerError};

#[derive(Debug, Error)]
pub enum ConsolidateError {
    #[error("No transactions to consolidate")]
    NoTransactions,
    #[error("Failed to update primary transaction {id}: {source}")]
    PrimaryUpdate {
        id: String,
        #[source]
        source: LedgerError,
    },
    #[error("Consolidation cancelled before the primary transaction was updated")]
    Cancelled,
}

pub const REASON_HAS_SPLITS: &str = "has splits";
pub const REASON_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDeletion {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidationResult {
    /// The primary transaction carrying the order total.
    pub consolidated: Transaction,
    /// Extras removed from the ledger. In a dry run, the extras that
    /// would have been removed.
    pub deleted: Vec<String>,
    pub failed_deletions: Vec<FailedDeletion>,
    pub dry_run: bool,
}

impl ConsolidationResult {
    pub fn is_clean(&self) -> bool {
        self.failed_deletions.is_empty()
    }
}

/// `Multi-delivery order (2 charges: $118.67, $8.31)`, in input order.
pub fn consolidation_note(transactions: &[Transaction]) -> String {
    let amounts: Vec<String> = transactions
        .iter()
        .map(|t| t.amount.abs().to_string())
        .collect();
    format!(
        "Multi-delivery order ({} charges: {})",
        transactions.len(),
        amounts.join(", ")
    )
}

/// Collapses the charges of one split-shipment order into the first
/// transaction and deletes the rest.
///
/// The primary update is the only step that must succeed. Extras that
/// already carry splits are never deleted, and a failed delete does not
/// stop the remaining ones; both end up in `failed_deletions`. A
/// single transaction comes back untouched without any ledger call.
pub async fn consolidate_transactions<L: LedgerClient>(
    client: &L,
    transactions: &[Transaction],
    order: &Order,
    dry_run: bool,
    cancel: &CancelSignal,
) -> Result<ConsolidationResult, ConsolidateError> {
    let (primary, extras) = transactions
        .split_first()
        .ok_or(ConsolidateError::NoTransactions)?;

    if extras.is_empty() {
        return Ok(ConsolidationResult {
            consolidated: primary.clone(),
            deleted: Vec::new(),
            failed_deletions: Vec::new(),
            dry_run,
        });
    }

    let update = TransactionUpdate {
        amount: Some(order.total.with_sign_of(primary.amount)),
        notes: Some(consolidation_note(transactions)),
        ..Default::default()
    };

    let consolidated = if dry_run {
        let mut preview = primary.clone();
        update.apply_to(&mut preview);
        preview
    } else {
        if cancel.is_cancelled() {
            return Err(ConsolidateError::Cancelled);
        }
        client
            .update(&primary.id, &update)
            .await
            .map_err(|source| ConsolidateError::PrimaryUpdate {
                id: primary.id.clone(),
                source,
            })?
    };

    tracing::info!(
        order_id = %order.id,
        primary = %primary.id,
        extras = extras.len(),
        amount = %consolidated.amount,
        dry_run,
        "consolidated multi-delivery charges"
    );

    let mut deleted = Vec::new();
    let mut failed_deletions = Vec::new();

    for extra in extras {
        if extra.is_split() {
            failed_deletions.push(FailedDeletion {
                transaction_id: extra.id.clone(),
                reason: REASON_HAS_SPLITS.to_string(),
            });
            continue;
        }
        if dry_run {
            deleted.push(extra.id.clone());
            continue;
        }
        if cancel.is_cancelled() {
            failed_deletions.push(FailedDeletion {
                transaction_id: extra.id.clone(),
                reason: REASON_CANCELLED.to_string(),
            });
            continue;
        }
        match client.delete(&extra.id).await {
            Ok(()) => deleted.push(extra.id.clone()),
            Err(e) => failed_deletions.push(FailedDeletion {
                transaction_id: extra.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    for failed in &failed_deletions {
        tracing::warn!(
            order_id = %order.id,
            transaction_id = %failed.transaction_id,
            reason = %failed.reason,
            "extra charge left in ledger, needs manual cleanup"
        );
    }

    Ok(ConsolidationResult {
        consolidated,
        deleted,
        failed_deletions,
        dry_run,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::{cancel_pair, CancelHandle};
    use crate::ledger::MemoryLedger;
    use cartledger_core::{DateRange, Money, OrderKind, Provider, Split};
    use chrono::NaiveDate;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn tx(id: &str, cents: i64) -> Transaction {
        Transaction::new(id, Money::from_cents(cents), date(3), "WALMART.COM")
    }

    fn order(total_cents: i64) -> Order {
        Order {
            id: "wm-1".to_string(),
            provider: Provider::Walmart,
            date: date(1),
            total: Money::from_cents(total_cents),
            subtotal: Money::from_cents(total_cents),
            tax: Money::zero(),
            tip: Money::zero(),
            fees: Money::zero(),
            items: vec![],
            kind: OrderKind::Simple,
        }
    }

    fn with_split(mut t: Transaction) -> Transaction {
        t.splits.push(Split {
            category_id: "groceries".to_string(),
            category_name: "Groceries".to_string(),
            amount: t.amount,
            notes: String::new(),
        });
        t.has_splits = true;
        t
    }

    #[test]
    fn note_lists_amounts_in_input_order() {
        let txs = [tx("a", -11867), tx("b", -831)];
        assert_eq!(
            consolidation_note(&txs),
            "Multi-delivery order (2 charges: $118.67, $8.31)"
        );
    }

    #[tokio::test]
    async fn empty_input_is_an_error() {
        let ledger = MemoryLedger::default();
        let err = consolidate_transactions(&ledger, &[], &order(100), false, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidateError::NoTransactions));
    }

    #[tokio::test]
    async fn single_transaction_is_returned_unchanged() {
        let only = tx("a", -5000);
        let ledger = MemoryLedger::new(vec![only.clone()]);
        let result = consolidate_transactions(
            &ledger,
            std::slice::from_ref(&only),
            &order(5000),
            false,
            &CancelSignal::never(),
        )
        .await
        .unwrap();
        assert_eq!(result.consolidated, only);
        assert!(result.deleted.is_empty());
        assert_eq!(ledger.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn merges_two_charges_into_primary() {
        let txs = vec![tx("a", -11867), tx("b", -831)];
        let ledger = MemoryLedger::new(txs.clone());
        let result = consolidate_transactions(&ledger, &txs, &order(12698), false, &CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(result.consolidated.id, "a");
        assert_eq!(result.consolidated.amount, Money::from_cents(-12698));
        assert_eq!(
            result.consolidated.notes.as_deref(),
            Some("Multi-delivery order (2 charges: $118.67, $8.31)")
        );
        assert_eq!(result.deleted, vec!["b".to_string()]);
        assert!(result.is_clean());

        let remaining = ledger.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].amount, Money::from_cents(-12698));
    }

    #[tokio::test]
    async fn positive_primary_stays_positive() {
        let txs = vec![tx("r1", 1000), tx("r2", 500)];
        let ledger = MemoryLedger::new(txs.clone());
        let result = consolidate_transactions(&ledger, &txs, &order(1500), false, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(result.consolidated.amount, Money::from_cents(1500));
    }

    #[tokio::test]
    async fn dry_run_makes_no_calls() {
        let txs = vec![tx("a", -11867), tx("b", -831)];
        let ledger = MemoryLedger::new(txs.clone());
        let result = consolidate_transactions(&ledger, &txs, &order(12698), true, &CancelSignal::never())
            .await
            .unwrap();
        assert!(result.dry_run);
        assert_eq!(result.consolidated.amount, Money::from_cents(-12698));
        assert_eq!(result.deleted, vec!["b".to_string()]);
        assert_eq!(ledger.mutation_count().await, 0);
        assert_eq!(ledger.snapshot().await, txs);
    }

    #[tokio::test]
    async fn extra_with_splits_is_kept_and_reported() {
        let txs = vec![tx("a", -6000), with_split(tx("b", -3000)), tx("c", -1000)];
        let ledger = MemoryLedger::new(txs.clone());
        let result = consolidate_transactions(&ledger, &txs, &order(10000), false, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(
            result.failed_deletions,
            vec![FailedDeletion {
                transaction_id: "b".to_string(),
                reason: REASON_HAS_SPLITS.to_string()
            }]
        );
        assert_eq!(result.deleted, vec!["c".to_string()]);
        assert_eq!(result.consolidated.amount, Money::from_cents(-10000));
        assert!(ledger.get("b").await.is_some());
        assert!(ledger.get("c").await.is_none());
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_the_rest() {
        let txs = vec![tx("a", -6000), tx("b", -3000), tx("c", -1000)];
        let ledger = MemoryLedger::new(txs.clone());
        ledger.fail_deletes_of("b").await;
        let result = consolidate_transactions(&ledger, &txs, &order(10000), false, &CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(result.failed_deletions.len(), 1);
        assert_eq!(result.failed_deletions[0].transaction_id, "b");
        assert_eq!(result.deleted, vec!["c".to_string()]);
    }

    #[tokio::test]
    async fn primary_update_failure_is_fatal() {
        let txs = vec![tx("a", -6000), tx("b", -4000)];
        let ledger = MemoryLedger::new(txs.clone());
        ledger.fail_updates_of("a").await;
        let err = consolidate_transactions(&ledger, &txs, &order(10000), false, &CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidateError::PrimaryUpdate { ref id, .. } if id == "a"));
        assert!(ledger.get("b").await.is_some());
    }

    #[tokio::test]
    async fn cancelled_before_start_touches_nothing() {
        let txs = vec![tx("a", -6000), tx("b", -4000)];
        let ledger = MemoryLedger::new(txs.clone());
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let err = consolidate_transactions(&ledger, &txs, &order(10000), false, &signal)
            .await
            .unwrap_err();
        assert!(matches!(err, ConsolidateError::Cancelled));
        assert_eq!(ledger.mutation_count().await, 0);
    }

    /// Fires the cancel handle as soon as the primary update lands.
    struct CancelAfterUpdate {
        inner: MemoryLedger,
        handle: CancelHandle,
    }

    impl LedgerClient for CancelAfterUpdate {
        async fn fetch_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, LedgerError> {
            self.inner.fetch_transactions(range).await
        }

        async fn update(&self, id: &str, update: &TransactionUpdate) -> Result<Transaction, LedgerError> {
            let updated = self.inner.update(id, update).await;
            self.handle.cancel();
            updated
        }

        async fn update_splits(&self, id: &str, splits: &[Split]) -> Result<(), LedgerError> {
            self.inner.update_splits(id, splits).await
        }

        async fn delete(&self, id: &str) -> Result<(), LedgerError> {
            self.inner.delete(id).await
        }
    }

    #[tokio::test]
    async fn cancel_after_primary_update_leaves_extras_in_place() {
        let txs = vec![tx("a", -6000), tx("b", -3000), tx("c", -1327)];
        let (handle, signal) = cancel_pair();
        let ledger = CancelAfterUpdate {
            inner: MemoryLedger::new(txs.clone()),
            handle,
        };

        let result = consolidate_transactions(&ledger, &txs, &order(10327), false, &signal)
            .await
            .unwrap();

        assert!(signal.is_cancelled());
        assert_eq!(result.consolidated.amount, Money::from_cents(-10327));
        assert_eq!(ledger.inner.get("a").await.unwrap().amount, Money::from_cents(-10327));
        assert!(result.deleted.is_empty());
        let failed: Vec<(&str, &str)> = result
            .failed_deletions
            .iter()
            .map(|f| (f.transaction_id.as_str(), f.reason.as_str()))
            .collect();
        assert_eq!(failed, vec![("b", REASON_CANCELLED), ("c", REASON_CANCELLED)]);
        assert_eq!(ledger.inner.snapshot().await.len(), 3);
        assert!(!result.is_clean());
    }
}
