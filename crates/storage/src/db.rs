use std::path::Path;
use std::str::FromStr;

use cartledger_core::{Money, Provider};
use cartledger_reconcile::{ApiCallLog, ProcessingRecord, RecordStatus, RecordStore, StoreError};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub type DbPool = Pool<Sqlite>;

type RecordRow = (
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
    i64,
    Option<i64>,
    String,
    Option<String>,
    Option<String>,
    String,
);

type ApiCallRow = (String, String, Option<String>, i64, Option<String>, String);

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::backend(e)
}

pub async fn create_db(path: &Path) -> Result<DbPool, StoreError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .map_err(backend)?;

    for pragma in [
        "PRAGMA journal_mode = WAL",
        "PRAGMA foreign_keys = ON",
        "PRAGMA synchronous = NORMAL",
        "PRAGMA busy_timeout = 5000",
        "PRAGMA cache_size = -32000",
    ] {
        sqlx::query(pragma).execute(&pool).await.map_err(backend)?;
    }

    run_migrations(&pool).await?;
    tracing::debug!(path = %path.display(), "record database ready");

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            provider TEXT NOT NULL,
            order_id TEXT NOT NULL,
            order_date TEXT NOT NULL,
            order_total_cents INTEGER NOT NULL,
            status TEXT NOT NULL,
            transaction_id TEXT,
            split_count INTEGER NOT NULL DEFAULT 0,
            date_diff_days INTEGER,
            items_json TEXT NOT NULL,
            splits_json TEXT,
            error_message TEXT,
            processed_at TEXT NOT NULL,
            UNIQUE (provider, order_id)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(backend)?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS api_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            request_json TEXT NOT NULL,
            response_json TEXT,
            duration_ms INTEGER NOT NULL,
            error TEXT,
            called_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(backend)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_calls_method ON api_calls (method)")
        .execute(pool)
        .await
        .map_err(backend)?;

    Ok(())
}

/// Inserts the record, replacing any earlier one for the same order.
pub async fn save_record(pool: &DbPool, record: &ProcessingRecord) -> Result<(), StoreError> {
    let total_cents = record
        .order_total
        .to_cents()
        .ok_or(StoreError::OutOfRange(record.order_total))?;
    sqlx::query(
        r#"
        INSERT INTO processing_records (
            provider, order_id, order_date, order_total_cents, status, transaction_id,
            split_count, date_diff_days, items_json, splits_json, error_message, processed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (provider, order_id) DO UPDATE SET
            order_date = excluded.order_date,
            order_total_cents = excluded.order_total_cents,
            status = excluded.status,
            transaction_id = excluded.transaction_id,
            split_count = excluded.split_count,
            date_diff_days = excluded.date_diff_days,
            items_json = excluded.items_json,
            splits_json = excluded.splits_json,
            error_message = excluded.error_message,
            processed_at = excluded.processed_at
        "#,
    )
    .bind(record.provider.as_str())
    .bind(&record.order_id)
    .bind(record.order_date.to_string())
    .bind(total_cents)
    .bind(record.status.as_str())
    .bind(&record.transaction_id)
    .bind(record.split_count as i64)
    .bind(record.date_diff_days)
    .bind(&record.items_json)
    .bind(&record.splits_json)
    .bind(&record.error_message)
    .bind(record.processed_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(backend)?;

    Ok(())
}

const RECORD_COLUMNS: &str = "provider, order_id, order_date, order_total_cents, status, transaction_id, split_count, date_diff_days, items_json, splits_json, error_message, processed_at";

pub async fn get_record(
    pool: &DbPool,
    provider: Provider,
    order_id: &str,
) -> Result<Option<ProcessingRecord>, StoreError> {
    let row = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM processing_records WHERE provider = ? AND order_id = ?"
    ))
    .bind(provider.as_str())
    .bind(order_id)
    .fetch_optional(pool)
    .await
    .map_err(backend)?;

    row.map(record_from_row).transpose()
}

/// Only a success record counts; failed, pending and dry-run orders are
/// picked up again on the next run.
pub async fn is_processed(pool: &DbPool, provider: Provider, order_id: &str) -> Result<bool, StoreError> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM processing_records WHERE provider = ? AND order_id = ? AND status = ?",
    )
    .bind(provider.as_str())
    .bind(order_id)
    .bind(RecordStatus::Success.as_str())
    .fetch_one(pool)
    .await
    .map_err(backend)?;

    Ok(count.0 > 0)
}

pub async fn recent_records(pool: &DbPool, limit: i64) -> Result<Vec<ProcessingRecord>, StoreError> {
    let rows = sqlx::query_as::<_, RecordRow>(&format!(
        "SELECT {RECORD_COLUMNS} FROM processing_records ORDER BY processed_at DESC, id DESC LIMIT ?"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(backend)?;

    rows.into_iter().map(record_from_row).collect()
}

pub async fn log_api_call(pool: &DbPool, call: &ApiCallLog) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO api_calls (method, request_json, response_json, duration_ms, error, called_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&call.method)
    .bind(&call.request_json)
    .bind(&call.response_json)
    .bind(call.duration_ms)
    .bind(&call.error)
    .bind(call.called_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(backend)?;

    Ok(())
}

pub async fn api_calls_for(pool: &DbPool, method: &str) -> Result<Vec<ApiCallLog>, StoreError> {
    let rows = sqlx::query_as::<_, ApiCallRow>(
        "SELECT method, request_json, response_json, duration_ms, error, called_at FROM api_calls WHERE method = ? ORDER BY id",
    )
    .bind(method)
    .fetch_all(pool)
    .await
    .map_err(backend)?;

    rows.into_iter()
        .map(|r| {
            Ok(ApiCallLog {
                method: r.0,
                request_json: r.1,
                response_json: r.2,
                duration_ms: r.3,
                error: r.4,
                called_at: parse_timestamp(&r.5)?,
            })
        })
        .collect()
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{s}': {e}")))
}

fn record_from_row(r: RecordRow) -> Result<ProcessingRecord, StoreError> {
    let provider = Provider::from_str(&r.0).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    let order_date = NaiveDate::parse_from_str(&r.2, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad order date '{}': {e}", r.2)))?;
    Ok(ProcessingRecord {
        order_id: r.1,
        provider,
        order_date,
        order_total: Money::from_cents(r.3),
        status: r.4.parse()?,
        transaction_id: r.5,
        split_count: r.6.max(0) as usize,
        date_diff_days: r.7,
        items_json: r.8,
        splits_json: r.9,
        error_message: r.10,
        processed_at: parse_timestamp(&r.11)?,
    })
}

/// [`RecordStore`] over the SQLite pool.
#[derive(Clone)]
pub struct SqliteRecordStore {
    pool: DbPool,
}

impl SqliteRecordStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl RecordStore for SqliteRecordStore {
    async fn is_processed(&self, provider: Provider, order_id: &str) -> Result<bool, StoreError> {
        is_processed(&self.pool, provider, order_id).await
    }

    async fn save_record(&self, record: &ProcessingRecord) -> Result<(), StoreError> {
        save_record(&self.pool, record).await
    }

    async fn log_api_call(&self, call: &ApiCallLog) -> Result<(), StoreError> {
        log_api_call(&self.pool, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartledger_core::{Order, OrderItem, OrderKind};
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, DbPool) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_db(&dir.path().join("records.db")).await.unwrap();
        (dir, pool)
    }

    fn order(id: &str) -> Order {
        Order {
            id: id.to_string(),
            provider: Provider::Costco,
            date: NaiveDate::from_ymd_opt(2024, 8, 9).unwrap(),
            total: Money::from_cents(10327),
            subtotal: Money::from_cents(9500),
            tax: Money::from_cents(827),
            tip: Money::zero(),
            fees: Money::zero(),
            items: vec![OrderItem::new("Paper Towels", Money::from_cents(9500), 1)],
            kind: OrderKind::Simple,
        }
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let (_dir, pool) = test_db().await;
        let mut record = ProcessingRecord::for_order(&order("c-1"), RecordStatus::Success);
        record.transaction_id = Some("t-9".to_string());
        record.date_diff_days = Some(-2);
        save_record(&pool, &record).await.unwrap();

        let loaded = get_record(&pool, Provider::Costco, "c-1").await.unwrap().unwrap();
        assert_eq!(loaded.order_total, Money::from_cents(10327));
        assert_eq!(loaded.status, RecordStatus::Success);
        assert_eq!(loaded.transaction_id.as_deref(), Some("t-9"));
        assert_eq!(loaded.date_diff_days, Some(-2));
        assert!(loaded.items_json.contains("Paper Towels"));
        assert!(get_record(&pool, Provider::Walmart, "c-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn only_success_counts_as_processed() {
        let (_dir, pool) = test_db().await;
        let failed = ProcessingRecord::for_order(&order("c-2"), RecordStatus::Failed).with_error("x");
        save_record(&pool, &failed).await.unwrap();
        assert!(!is_processed(&pool, Provider::Costco, "c-2").await.unwrap());

        let success = ProcessingRecord::for_order(&order("c-2"), RecordStatus::Success);
        save_record(&pool, &success).await.unwrap();
        assert!(is_processed(&pool, Provider::Costco, "c-2").await.unwrap());

        let loaded = get_record(&pool, Provider::Costco, "c-2").await.unwrap().unwrap();
        assert_eq!(loaded.status, RecordStatus::Success);
        assert!(loaded.error_message.is_none());
        assert_eq!(recent_records(&pool, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_total_is_rejected_not_truncated() {
        let (_dir, pool) = test_db().await;
        let mut o = order("c-3");
        o.total = Money::from_cents(i64::MAX) + Money::from_cents(i64::MAX);
        let record = ProcessingRecord::for_order(&o, RecordStatus::Success);

        let err = save_record(&pool, &record).await.unwrap_err();
        assert!(matches!(err, StoreError::OutOfRange(_)));
        assert!(get_record(&pool, Provider::Costco, "c-3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn api_calls_are_queryable_by_method() {
        let (_dir, pool) = test_db().await;
        let store = SqliteRecordStore::new(pool.clone());
        for method in ["update", "delete", "update"] {
            let call = ApiCallLog {
                method: method.to_string(),
                request_json: "{}".to_string(),
                response_json: None,
                duration_ms: 3,
                error: None,
                called_at: Utc::now(),
            };
            store.log_api_call(&call).await.unwrap();
        }
        assert_eq!(api_calls_for(&pool, "update").await.unwrap().len(), 2);
        assert_eq!(api_calls_for(&pool, "delete").await.unwrap().len(), 1);
    }
}
