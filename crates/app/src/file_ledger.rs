use std::path::{Path, PathBuf};

use anyhow::Context;
use cartledger_core::{DateRange, Split, Transaction, TransactionUpdate};
use cartledger_reconcile::{LedgerClient, LedgerError, MemoryLedger};

/// A ledger kept in a JSON file holding an array of transactions. Changes are
/// made in memory and only reach the file on [`FileLedger::save`].
pub struct FileLedger {
    path: PathBuf,
    inner: MemoryLedger,
}

impl FileLedger {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read ledger {}", path.display()))?;
        let transactions: Vec<Transaction> = serde_json::from_str(&content)
            .with_context(|| format!("invalid ledger file {}", path.display()))?;
        tracing::debug!(path = %path.display(), transactions = transactions.len(), "ledger loaded");
        Ok(Self {
            path: path.to_path_buf(),
            inner: MemoryLedger::new(transactions),
        })
    }

    /// Writes the current transactions back through a temp file.
    pub async fn save(&self) -> anyhow::Result<()> {
        let transactions = self.inner.snapshot().await;
        let json = serde_json::to_string_pretty(&transactions)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        tracing::info!(path = %self.path.display(), transactions = transactions.len(), "ledger saved");
        Ok(())
    }
}

impl LedgerClient for FileLedger {
    async fn fetch_transactions(&self, range: DateRange) -> Result<Vec<Transaction>, LedgerError> {
        self.inner.fetch_transactions(range).await
    }

    async fn update(&self, id: &str, update: &TransactionUpdate) -> Result<Transaction, LedgerError> {
        self.inner.update(id, update).await
    }

    async fn update_splits(&self, id: &str, splits: &[Split]) -> Result<(), LedgerError> {
        self.inner.update_splits(id, splits).await
    }

    async fn delete(&self, id: &str) -> Result<(), LedgerError> {
        self.inner.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartledger_core::Money;
    use chrono::NaiveDate;

    fn write_ledger(dir: &Path) -> PathBuf {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let transactions = vec![
            Transaction::new("a", Money::from_cents(-1250), date, "WALMART"),
            Transaction::new("b", Money::from_cents(-300), date, "WALMART"),
        ];
        let path = dir.join("ledger.json");
        std::fs::write(&path, serde_json::to_string(&transactions).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn changes_stay_in_memory_until_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ledger(dir.path());

        let ledger = FileLedger::load(&path).unwrap();
        ledger.delete("b").await.unwrap();
        assert_eq!(FileLedger::load(&path).unwrap().inner.snapshot().await.len(), 2);

        ledger.save().await.unwrap();
        let reloaded = FileLedger::load(&path).unwrap();
        let remaining = reloaded.inner.snapshot().await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "a");
    }

    #[tokio::test]
    async fn updates_round_trip_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_ledger(dir.path());

        let ledger = FileLedger::load(&path).unwrap();
        let update = TransactionUpdate {
            category_id: Some("groceries".to_string()),
            ..Default::default()
        };
        ledger.update("a", &update).await.unwrap();
        ledger.save().await.unwrap();

        let reloaded = FileLedger::load(&path).unwrap();
        let a = reloaded.inner.get("a").await.unwrap();
        assert_eq!(a.category_id.as_deref(), Some("groceries"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = FileLedger::load(&path).err().unwrap();
        assert!(err.to_string().contains("invalid ledger file"));
    }
}
