pub mod cancel;
pub mod classify;
pub mod consolidate;
pub mod ledger;
pub mod matcher;
pub mod record;
pub mod rules;
pub mod split;
pub mod sync;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use classify::{CategoryAssignments, ClassifierError, ItemClassifier};
pub use consolidate::{
    consolidate_transactions, consolidation_note, ConsolidateError, ConsolidationResult,
    FailedDeletion,
};
pub use ledger::{AuditedLedger, LedgerClient, LedgerError, MemoryLedger};
pub use matcher::{
    validate_multi_match, MatchError, MatchResult, Matcher, MatcherConfig, MultiMatchResult,
    UsedTransactions,
};
pub use record::{ApiCallLog, ProcessingRecord, RecordStatus, RecordStore, StoreError};
pub use rules::{CategoryRule, MatchType as RuleMatchType, RuleClassifier};
pub use split::{
    create_splits, single_category_info, CategoryGroup, CategoryGroups, SingleCategory, SplitError,
};
pub use sync::{
    Categorized, OrderFailure, OrderOutcome, ProgressEvent, ProviderSettings, SyncError,
    SyncOptions, SyncRunner, SyncSummary,
};
