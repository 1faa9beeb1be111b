#![warn(missing_docs)]
//! Разбор торговых выписок MetaTrader 5 и синхронизация сделок с внешними
//! хранилищами без повторной записи.

mod config;
mod dispatch;
mod error;
mod extract;
mod layout;
mod normalize;
mod raw;
mod reconcile;
mod statement;
mod statement_set;
pub mod store;
mod types;

pub use crate::config::{NotionConfig, SheetsConfig, SyncConfig};
pub use crate::dispatch::{
    DispatchSummary, FailedWrite, StoreOutcome, StoreReport, SyncReport, dispatch, sync_store,
    sync_stores,
};
pub use crate::error::{
    ConfigError, FieldKind, MalformedField, StatementError, StoreError, StoreErrorKind,
};
pub use crate::extract::{DelimitedSections, Extracted, MarkupSections, Section, SectionExtractor};
pub use crate::normalize::{FieldNormalizer, NumberFormat};
pub use crate::raw::{DomStatement, RawStatement, StatementFormat};
pub use crate::reconcile::{Mismatch, MismatchField, Reconciliation, reconcile};
pub use crate::statement::{
    DEFAULT_UTC_OFFSET_SECS, ParseOptions, ParseWarning, Statement, StatementBuilder,
    default_utc_offset,
};
pub use crate::statement_set::{LoadedStatement, StatementSet, latest_statement};
pub use crate::store::{JournalStore, MemoryStore, NotionStore, SheetsStore, TradeStore};
pub use crate::types::*;
