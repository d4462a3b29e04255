use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use cartledger_core::{DateRange, Split, Transaction, TransactionUpdate};
use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::record::{ApiCallLog, RecordStore};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Transaction not found: {0}")]
    NotFound(String),
    #[error("Ledger rejected request: {0}")]
    Rejected(String),
    #[error("Ledger I/O error: {0}")]
    Io(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// The personal-finance ledger holding bank transactions.
pub trait LedgerClient: Send + Sync {
    fn fetch_transactions(
        &self,
        range: DateRange,
    ) -> impl Future<Output = Result<Vec<Transaction>, LedgerError>> + Send;

    fn update(
        &self,
        id: &str,
        update: &TransactionUpdate,
    ) -> impl Future<Output = Result<Transaction, LedgerError>> + Send;

    fn update_splits(
        &self,
        id: &str,
        splits: &[Split],
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    fn delete(&self, id: &str) -> impl Future<Output = Result<(), LedgerError>> + Send;
}

impl<T: LedgerClient> LedgerClient for &T {
    async fn fetch_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, LedgerError> {
        (**self).fetch_transactions(range).await
    }

    async fn update(&self, id: &str, update: &TransactionUpdate) -> Result<Transaction, LedgerError> {
        (**self).update(id, update).await
    }

    async fn update_splits(&self, id: &str, splits: &[Split]) -> Result<(), LedgerError> {
        (**self).update_splits(id, splits).await
    }

    async fn delete(&self, id: &str) -> Result<(), LedgerError> {
        (**self).delete(id).await
    }
}

// ── Audit wrapper ─────────────────────────────────────────────────────────────

/// Forwards every call to `inner` and writes an [`ApiCallLog`] per call.
/// A failing audit write is logged and never fails the call itself.
pub struct AuditedLedger<L, S> {
    inner: L,
    store: S,
}

impl<L: LedgerClient, S: RecordStore> AuditedLedger<L, S> {
    pub fn new(inner: L, store: S) -> Self {
        Self { inner, store }
    }

    async fn audited<T, Fut>(
        &self,
        method: &str,
        request: Value,
        call: Fut,
        summarize: impl FnOnce(&T) -> Value,
    ) -> Result<T, LedgerError>
    where
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let started = Instant::now();
        let result = call.await;
        let (response_json, error) = match &result {
            Ok(v) => (Some(summarize(v).to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let entry = ApiCallLog {
            method: method.to_string(),
            request_json: request.to_string(),
            response_json,
            duration_ms: started.elapsed().as_millis() as i64,
            error,
            called_at: Utc::now(),
        };
        if let Err(e) = self.store.log_api_call(&entry).await {
            tracing::warn!(method, "failed to write API audit entry: {e}");
        }
        result
    }
}

impl<L: LedgerClient, S: RecordStore> LedgerClient for AuditedLedger<L, S> {
    async fn fetch_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, LedgerError> {
        self.audited(
            "fetch_transactions",
            json!({ "start": range.start, "end": range.end }),
            self.inner.fetch_transactions(range),
            |txs: &Vec<Transaction>| json!({ "count": txs.len() }),
        )
        .await
    }

    async fn update(&self, id: &str, update: &TransactionUpdate) -> Result<Transaction, LedgerError> {
        self.audited(
            "update",
            json!({ "id": id, "update": update }),
            self.inner.update(id, update),
            |tx: &Transaction| json!(tx),
        )
        .await
    }

    async fn update_splits(&self, id: &str, splits: &[Split]) -> Result<(), LedgerError> {
        self.audited(
            "update_splits",
            json!({ "id": id, "splits": splits }),
            self.inner.update_splits(id, splits),
            |_: &()| json!({ "ok": true }),
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), LedgerError> {
        self.audited(
            "delete",
            json!({ "id": id }),
            self.inner.delete(id),
            |_: &()| json!({ "ok": true }),
        )
        .await
    }
}

// ── In-memory ledger ──────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    transactions: Vec<Transaction>,
    failing_deletes: HashSet<String>,
    failing_updates: HashSet<String>,
    mutations: usize,
}

/// A ledger held in memory. Backs the file ledger of the CLI and the tests.
#[derive(Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    pub fn new(transactions: Vec<Transaction>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                transactions,
                ..Default::default()
            }),
        }
    }

    /// Makes every delete of `id` fail with [`LedgerError::Rejected`].
    pub async fn fail_deletes_of(&self, id: &str) {
        self.state.lock().await.failing_deletes.insert(id.to_string());
    }

    /// Makes every update of `id` fail with [`LedgerError::Rejected`].
    pub async fn fail_updates_of(&self, id: &str) {
        self.state.lock().await.failing_updates.insert(id.to_string());
    }

    pub async fn snapshot(&self) -> Vec<Transaction> {
        self.state.lock().await.transactions.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Transaction> {
        self.state
            .lock()
            .await
            .transactions
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    /// Number of successful update/delete calls so far.
    pub async fn mutation_count(&self) -> usize {
        self.state.lock().await.mutations
    }
}

impl LedgerClient for MemoryLedger {
    async fn fetch_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| range.contains(t.date))
            .cloned()
            .collect())
    }

    async fn update(&self, id: &str, update: &TransactionUpdate) -> Result<Transaction, LedgerError> {
        let mut state = self.state.lock().await;
        if state.failing_updates.contains(id) {
            return Err(LedgerError::Rejected(format!("update of {id} refused")));
        }
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        update.apply_to(tx);
        let updated = tx.clone();
        state.mutations += 1;
        Ok(updated)
    }

    async fn update_splits(&self, id: &str, splits: &[Split]) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.failing_updates.contains(id) {
            return Err(LedgerError::Rejected(format!("split update of {id} refused")));
        }
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.to_string()))?;
        tx.splits = splits.to_vec();
        tx.has_splits = !splits.is_empty();
        state.mutations += 1;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        if state.failing_deletes.contains(id) {
            return Err(LedgerError::Rejected(format!("delete of {id} refused")));
        }
        let before = state.transactions.len();
        state.transactions.retain(|t| t.id != id);
        if state.transactions.len() == before {
            return Err(LedgerError::NotFound(id.to_string()));
        }
        state.mutations += 1;
        Ok(())
    }
}
