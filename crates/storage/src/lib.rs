pub mod db;

pub use db::{
    api_calls_for, create_db, get_record, is_processed, log_api_call, recent_records, save_record,
    DbPool, SqliteRecordStore,
};
