use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::money::Money;

/// A bank ledger entry. Negative amounts are money out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: Money,
    pub date: NaiveDate,
    pub merchant: String,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub has_splits: bool,
    #[serde(default)]
    pub splits: Vec<Split>,
}

impl Transaction {
    pub fn new(id: &str, amount: Money, date: NaiveDate, merchant: &str) -> Self {
        Transaction {
            id: id.to_string(),
            amount,
            date,
            merchant: merchant.to_string(),
            category_id: None,
            notes: None,
            has_splits: false,
            splits: Vec::new(),
        }
    }

    pub fn is_split(&self) -> bool {
        self.has_splits || !self.splits.is_empty()
    }

    /// Case-insensitive substring match of any keyword against the merchant.
    pub fn merchant_matches(&self, keywords: &[impl AsRef<str>]) -> bool {
        let merchant = self.merchant.to_lowercase();
        keywords
            .iter()
            .any(|k| merchant.contains(&k.as_ref().to_lowercase()))
    }
}

/// One category's share of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub category_id: String,
    pub category_name: String,
    pub amount: Money,
    pub notes: String,
}

/// Partial update sent to the ledger. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl TransactionUpdate {
    pub fn is_empty(&self) -> bool {
        self.amount.is_none() && self.category_id.is_none() && self.notes.is_none()
    }

    pub fn apply_to(&self, tx: &mut Transaction) {
        if let Some(amount) = self.amount {
            tx.amount = amount;
        }
        if let Some(category_id) = &self.category_id {
            tx.category_id = Some(category_id.clone());
        }
        if let Some(notes) = &self.notes {
            tx.notes = Some(notes.clone());
        }
    }
}
