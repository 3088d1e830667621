//! `RecordStore` trait: the single async interface over persisted records.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::ingest::types::NormalizedRecord;

/// Largest page or result size any caller may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A record as persisted, with its tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    pub external_id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub content_type: String,
    pub body: String,
    pub is_processed: bool,
    pub imported_at: DateTime<Utc>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Newly stored under the given id.
    Inserted(String),
    /// A record with the same external id already exists.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagRemoval {
    Removed,
    NotFound,
}

/// Conjunctive filter for [`RecordStore::query`]. Empty fields match all.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordFilter {
    /// Substring of subject or body.
    pub text: Option<String>,
    /// Substring of the sender.
    pub sender: Option<String>,
    /// Inclusive calendar-day bounds; unknown dates never match.
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    /// Exact category name.
    pub category: Option<String>,
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, page_size: u32, total: u64) -> Self {
        let total_pages = total.div_ceil(u64::from(page_size.max(1))) as u32;
        Self {
            items,
            page,
            page_size,
            total,
            total_pages,
        }
    }
}

/// Clamp a requested page number and size into the accepted ranges.
pub fn clamp_paging(page: u32, page_size: u32) -> (u32, u32) {
    (page.max(1), page_size.clamp(1, MAX_PAGE_SIZE))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub day: String,
    pub count: u64,
}

/// Aggregate figures over the whole store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Statistics {
    pub total: u64,
    pub processed: u64,
    pub unprocessed: u64,
    pub per_category: Vec<CategoryCount>,
    pub top_senders: Vec<SenderCount>,
    pub recent_days: Vec<DayCount>,
}

/// Backend-agnostic record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Records ─────────────────────────────────────────────────────

    /// Insert unless a record with the same external id exists.
    async fn insert_if_absent(&self, record: &NormalizedRecord)
    -> Result<InsertOutcome, DatabaseError>;

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>, DatabaseError>;

    /// Set the processed flag. `NotFound` for an unknown record.
    async fn set_processed(&self, record_id: &str, processed: bool) -> Result<(), DatabaseError>;

    async fn count_records(&self) -> Result<u64, DatabaseError>;

    // ── Tags ────────────────────────────────────────────────────────

    /// Tag a record, creating the category on first use. Idempotent.
    async fn tag(&self, record_id: &str, category: &str) -> Result<(), DatabaseError>;

    async fn untag(&self, record_id: &str, category: &str) -> Result<TagRemoval, DatabaseError>;

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, DatabaseError>;

    // ── Queries ─────────────────────────────────────────────────────

    /// Filtered records, newest first, unknown dates last.
    async fn query(
        &self,
        filter: &RecordFilter,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, DatabaseError>;

    /// Paginated records; `query` matches subject or sender.
    async fn page(
        &self,
        query: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<StoredRecord>, DatabaseError>;

    /// Paginated records matching `filter`, in `query` order.
    async fn page_filtered(
        &self,
        filter: &RecordFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<StoredRecord>, DatabaseError>;

    async fn statistics(&self) -> Result<Statistics, DatabaseError>;
}
