use std::fmt;
use std::future::Future;
use std::str::FromStr;

use cartledger_core::{Money, Order, Provider, Split};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
    #[error("Amount {0} is out of range for storage")]
    OutOfRange(Money),
}

impl StoreError {
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        StoreError::Backend(Box::new(e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
    Skipped,
    DryRun,
    Pending,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Success => "success",
            RecordStatus::Failed => "failed",
            RecordStatus::Skipped => "skipped",
            RecordStatus::DryRun => "dry_run",
            RecordStatus::Pending => "pending",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(RecordStatus::Success),
            "failed" => Ok(RecordStatus::Failed),
            "skipped" => Ok(RecordStatus::Skipped),
            "dry_run" => Ok(RecordStatus::DryRun),
            "pending" => Ok(RecordStatus::Pending),
            other => Err(StoreError::Corrupt(format!("unknown status '{other}'"))),
        }
    }
}

/// Outcome of one order in one sync run. Always carries enough order
/// context to find the order by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub order_id: String,
    pub provider: Provider,
    pub order_date: NaiveDate,
    pub order_total: Money,
    pub status: RecordStatus,
    pub transaction_id: Option<String>,
    pub split_count: usize,
    pub date_diff_days: Option<i64>,
    pub items_json: String,
    pub splits_json: Option<String>,
    pub error_message: Option<String>,
    pub processed_at: DateTime<Utc>,
}

impl ProcessingRecord {
    pub fn for_order(order: &Order, status: RecordStatus) -> Self {
        ProcessingRecord {
            order_id: order.id.clone(),
            provider: order.provider,
            order_date: order.date,
            order_total: order.total,
            status,
            transaction_id: None,
            split_count: 0,
            date_diff_days: None,
            // Serializing plain item structs cannot fail.
            items_json: serde_json::to_string(&order.items).unwrap_or_default(),
            splits_json: None,
            error_message: None,
            processed_at: Utc::now(),
        }
    }

    pub fn with_splits(mut self, splits: &[Split]) -> Self {
        self.split_count = splits.len();
        self.splits_json = serde_json::to_string(splits).ok();
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// One external ledger call, for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCallLog {
    pub method: String,
    pub request_json: String,
    pub response_json: Option<String>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub called_at: DateTime<Utc>,
}

/// Where sync outcomes and audit entries go.
pub trait RecordStore: Send + Sync {
    fn is_processed(
        &self,
        provider: Provider,
        order_id: &str,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn save_record(
        &self,
        record: &ProcessingRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn log_api_call(&self, call: &ApiCallLog) -> impl Future<Output = Result<(), StoreError>> + Send;
}

impl<T: RecordStore> RecordStore for &T {
    async fn is_processed(&self, provider: Provider, order_id: &str) -> Result<bool, StoreError> {
        (**self).is_processed(provider, order_id).await
    }

    async fn save_record(&self, record: &ProcessingRecord) -> Result<(), StoreError> {
        (**self).save_record(record).await
    }

    async fn log_api_call(&self, call: &ApiCallLog) -> Result<(), StoreError> {
        (**self).log_api_call(call).await
    }
}
