use cartledger_core::{Category, DateRange, Money, Order, Provider, Split, Transaction, TransactionUpdate};
use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use crate::cancel::CancelSignal;
use crate::classify::{ClassifierError, ItemClassifier};
use crate::consolidate::{consolidate_transactions, ConsolidateError, FailedDeletion};
use crate::ledger::{LedgerClient, LedgerError};
use crate::matcher::{MatchError, Matcher, MatcherConfig, UsedTransactions};
use crate::record::{ProcessingRecord, RecordStatus, RecordStore, StoreError};
use crate::split::{single_category_for_groups, splits_for_groups, CategoryGroups, SplitError};

/// Aborts the whole run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to fetch transactions for {provider}: {source}")]
    Fetch {
        provider: Provider,
        #[source]
        source: LedgerError,
    },
}

/// Fails one order; the run moves on.
#[derive(Debug, Error)]
enum OrderError {
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("Found {found} of {expected} charges for multi-delivery order")]
    IncompleteCharges { found: usize, expected: usize },
    #[error(transparent)]
    Consolidate(#[from] ConsolidateError),
    #[error("Categorization failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Split(#[from] SplitError),
    #[error("Ledger write failed: {0}")]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    pub dry_run: bool,
    /// Reprocess orders that already have a success record.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub provider: Provider,
    pub matcher: MatcherConfig,
    /// Bank merchant fragments; transactions matching none are ignored.
    pub merchant_keywords: Vec<String>,
    /// Extra days fetched beyond the date tolerance.
    pub lookback_days: u64,
}

impl ProviderSettings {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            matcher: MatcherConfig::for_provider(provider),
            merchant_keywords: provider
                .merchant_keywords()
                .iter()
                .map(|k| k.to_string())
                .collect(),
            lookback_days: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderFailure {
    pub order_id: String,
    pub provider: Provider,
    pub date: NaiveDate,
    pub total: Money,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Categorized {
    pub transaction_id: String,
    pub date_diff_days: i64,
    /// Empty when the category went straight onto the transaction.
    pub splits: Vec<Split>,
    pub category_id: Option<String>,
    pub dry_run: bool,
    pub failed_deletions: Vec<FailedDeletion>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Categorized(Categorized),
    AlreadyProcessed,
    Skipped { transaction_id: String, reason: String },
    Pending,
    Failed(OrderFailure),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncSummary {
    pub processed: usize,
    pub dry_run: usize,
    pub skipped: usize,
    pub pending: usize,
    pub failed: Vec<OrderFailure>,
    pub failed_deletions: Vec<FailedDeletion>,
    pub cancelled: bool,
}

impl SyncSummary {
    fn tally(&mut self, outcome: &OrderOutcome) {
        match outcome {
            OrderOutcome::Categorized(c) => {
                if c.dry_run {
                    self.dry_run += 1;
                } else {
                    self.processed += 1;
                }
                self.failed_deletions.extend(c.failed_deletions.iter().cloned());
            }
            OrderOutcome::AlreadyProcessed | OrderOutcome::Skipped { .. } => self.skipped += 1,
            OrderOutcome::Pending => self.pending += 1,
            OrderOutcome::Failed(f) => self.failed.push(f.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Fetching { provider: Provider, range: DateRange },
    Matching { orders: usize, transactions: usize },
    Processing { index: usize, total: usize, order_id: String },
    Completed { summary: SyncSummary },
}

/// Runs one provider's orders against the ledger, one order at a time.
pub struct SyncRunner<L, C, S> {
    ledger: L,
    classifier: C,
    store: S,
    settings: ProviderSettings,
    categories: Vec<Category>,
}

impl<L: LedgerClient, C: ItemClassifier, S: RecordStore> SyncRunner<L, C, S> {
    pub fn new(ledger: L, classifier: C, store: S, settings: ProviderSettings, categories: Vec<Category>) -> Self {
        Self {
            ledger,
            classifier,
            store,
            settings,
            categories,
        }
    }

    pub async fn run(
        &self,
        orders: &[Order],
        options: SyncOptions,
        cancel: &CancelSignal,
    ) -> Result<SyncSummary, SyncError> {
        self.run_with_progress(orders, options, cancel, |_| {}).await
    }

    pub async fn run_with_progress<P>(
        &self,
        orders: &[Order],
        options: SyncOptions,
        cancel: &CancelSignal,
        progress: P,
    ) -> Result<SyncSummary, SyncError>
    where
        P: Fn(ProgressEvent),
    {
        let provider = self.settings.provider;
        let mut summary = SyncSummary::default();

        let pad = self.settings.matcher.date_tolerance_days.unsigned_abs() + self.settings.lookback_days;
        let Some(range) = DateRange::around(orders.iter().map(|o| o.date), pad) else {
            progress(ProgressEvent::Completed { summary: summary.clone() });
            return Ok(summary);
        };

        progress(ProgressEvent::Fetching { provider, range });
        let fetched = self
            .ledger
            .fetch_transactions(range)
            .await
            .map_err(|source| SyncError::Fetch { provider, source })?;
        let candidates: Vec<Transaction> = fetched
            .into_iter()
            .filter(|t| {
                self.settings.merchant_keywords.is_empty()
                    || t.merchant_matches(self.settings.merchant_keywords.as_slice())
            })
            .collect();

        tracing::info!(
            %provider,
            %range,
            orders = orders.len(),
            transactions = candidates.len(),
            dry_run = options.dry_run,
            "starting sync"
        );
        progress(ProgressEvent::Matching {
            orders: orders.len(),
            transactions: candidates.len(),
        });

        let matcher = Matcher::new(self.settings.matcher);
        let mut used = UsedTransactions::new();

        for (index, order) in orders.iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!(remaining = orders.len() - index, "sync cancelled");
                summary.cancelled = true;
                break;
            }
            progress(ProgressEvent::Processing {
                index,
                total: orders.len(),
                order_id: order.id.clone(),
            });

            let span = tracing::info_span!("order", order_id = %order.id, %provider);
            let outcome = self
                .process_order(&matcher, order, &candidates, &mut used, options, cancel)
                .instrument(span)
                .await;
            let outcome = outcome.unwrap_or_else(|e| {
                OrderOutcome::Failed(OrderFailure {
                    order_id: order.id.clone(),
                    provider: order.provider,
                    date: order.date,
                    total: order.total,
                    message: e.to_string(),
                })
            });

            log_outcome(order, &outcome);
            self.persist(order, &outcome).await;
            summary.tally(&outcome);
        }

        tracing::info!(
            processed = summary.processed,
            dry_run = summary.dry_run,
            skipped = summary.skipped,
            pending = summary.pending,
            failed = summary.failed.len(),
            "sync finished"
        );
        progress(ProgressEvent::Completed { summary: summary.clone() });
        Ok(summary)
    }

    async fn process_order(
        &self,
        matcher: &Matcher,
        order: &Order,
        candidates: &[Transaction],
        used: &mut UsedTransactions,
        options: SyncOptions,
        cancel: &CancelSignal,
    ) -> Result<OrderOutcome, OrderError> {
        if !options.force && self.store.is_processed(order.provider, &order.id).await? {
            return Ok(OrderOutcome::AlreadyProcessed);
        }

        let (matched, date_diff_days) = match order.final_charges().filter(|c| c.len() > 1) {
            Some(charges) => {
                let multi = matcher.find_multiple_matches(order, candidates, used, charges)?;
                let found = multi.transactions();
                if found.is_empty() {
                    // An earlier run may have merged the charges before failing.
                    match matcher.find_match(order, candidates, used) {
                        Some(m) => (vec![m.transaction.clone()], m.date_diff_days),
                        None => return Ok(OrderOutcome::Pending),
                    }
                } else if !multi.all_found {
                    return Err(OrderError::IncompleteCharges {
                        found: found.len(),
                        expected: charges.len(),
                    });
                } else {
                    let date_diff = multi.found().map(|m| m.date_diff_days).next().unwrap_or_default();
                    (found.into_iter().cloned().collect::<Vec<_>>(), date_diff)
                }
            }
            None => match matcher.find_match(order, candidates, used) {
                Some(m) => (vec![m.transaction.clone()], m.date_diff_days),
                None => return Ok(OrderOutcome::Pending),
            },
        };
        for tx in &matched {
            used.mark(&tx.id);
        }

        let Some(primary) = matched.first() else {
            return Ok(OrderOutcome::Pending);
        };
        if primary.is_split() {
            return Ok(OrderOutcome::Skipped {
                transaction_id: primary.id.clone(),
                reason: "transaction already has splits".to_string(),
            });
        }

        // Everything that can fail without touching the ledger runs before
        // consolidation, so a failed order leaves its charges matchable.
        let assignments = self
            .classifier
            .categorize_items(&order.items, &self.categories)
            .await?;
        let groups = CategoryGroups::build(order, &assignments)?;

        let result = consolidate_transactions(&self.ledger, &matched, order, options.dry_run, cancel).await?;
        let target = result.consolidated;
        let failed_deletions = result.failed_deletions;

        let mut categorized = Categorized {
            transaction_id: target.id.clone(),
            date_diff_days,
            splits: Vec::new(),
            category_id: None,
            dry_run: options.dry_run,
            failed_deletions,
        };

        match splits_for_groups(order, &target, &groups) {
            Some(splits) => {
                if !options.dry_run {
                    self.ledger.update_splits(&target.id, &splits).await?;
                }
                categorized.splits = splits;
            }
            None => {
                let single = single_category_for_groups(&groups)?;
                let notes = match target.notes.as_deref() {
                    Some(existing) if existing.contains(&single.notes) => existing.to_string(),
                    Some(existing) if !existing.is_empty() => format!("{existing}\n\n{}", single.notes),
                    _ => single.notes,
                };
                let update = TransactionUpdate {
                    category_id: Some(single.category_id.clone()),
                    notes: Some(notes),
                    ..Default::default()
                };
                if !options.dry_run {
                    self.ledger.update(&target.id, &update).await?;
                }
                categorized.category_id = Some(single.category_id);
            }
        }

        Ok(OrderOutcome::Categorized(categorized))
    }

    async fn persist(&self, order: &Order, outcome: &OrderOutcome) {
        let Some(record) = record_for(order, outcome) else {
            return;
        };
        if let Err(e) = self.store.save_record(&record).await {
            tracing::warn!(order_id = %order.id, "failed to save processing record: {e}");
        }
    }
}

fn record_for(order: &Order, outcome: &OrderOutcome) -> Option<ProcessingRecord> {
    let record = match outcome {
        // Keep the earlier success record as is.
        OrderOutcome::AlreadyProcessed => return None,
        OrderOutcome::Categorized(c) => {
            let status = if c.dry_run {
                RecordStatus::DryRun
            } else {
                RecordStatus::Success
            };
            let mut record = ProcessingRecord::for_order(order, status).with_splits(&c.splits);
            record.transaction_id = Some(c.transaction_id.clone());
            record.date_diff_days = Some(c.date_diff_days);
            if !c.failed_deletions.is_empty() {
                let ids: Vec<&str> = c
                    .failed_deletions
                    .iter()
                    .map(|f| f.transaction_id.as_str())
                    .collect();
                record = record.with_error(format!("extra charges not deleted: {}", ids.join(", ")));
            }
            record
        }
        OrderOutcome::Skipped { transaction_id, reason } => {
            let mut record = ProcessingRecord::for_order(order, RecordStatus::Skipped).with_error(reason.clone());
            record.transaction_id = Some(transaction_id.clone());
            record
        }
        OrderOutcome::Pending => ProcessingRecord::for_order(order, RecordStatus::Pending),
        OrderOutcome::Failed(f) => {
            ProcessingRecord::for_order(order, RecordStatus::Failed).with_error(f.message.clone())
        }
    };
    Some(record)
}

fn log_outcome(order: &Order, outcome: &OrderOutcome) {
    match outcome {
        OrderOutcome::Categorized(c) => tracing::info!(
            order_id = %order.id,
            transaction_id = %c.transaction_id,
            splits = c.splits.len(),
            dry_run = c.dry_run,
            "order categorized"
        ),
        OrderOutcome::AlreadyProcessed => tracing::debug!(order_id = %order.id, "already processed"),
        OrderOutcome::Skipped { reason, .. } => tracing::info!(order_id = %order.id, %reason, "order skipped"),
        OrderOutcome::Pending => tracing::info!(
            order_id = %order.id,
            total = %order.total,
            date = %order.date,
            "no matching charge yet"
        ),
        OrderOutcome::Failed(f) => tracing::warn!(
            order_id = %f.order_id,
            provider = %f.provider,
            date = %f.date,
            total = %f.total,
            "order failed: {}",
            f.message
        ),
    }
}
