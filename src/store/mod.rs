//! Persistence layer: libSQL-backed record store with tagging.

pub mod import;
pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use import::{ImportSummary, import_records, load_document};
pub use libsql_backend::LibSqlBackend;
pub use traits::{
    CategorySummary, InsertOutcome, Page, RecordFilter, RecordStore, Statistics, StoredRecord,
    TagRemoval,
};
