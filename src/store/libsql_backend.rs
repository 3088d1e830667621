//! libSQL backend for `RecordStore`.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared by all operations; every statement auto-commits.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::ingest::types::NormalizedRecord;
use crate::store::migrations;
use crate::store::traits::{
    CategoryCount, CategorySummary, DayCount, InsertOutcome, Page, RecordFilter, RecordStore,
    SenderCount, Statistics, StoredRecord, TagRemoval, clamp_paging,
};

/// libSQL record store.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn fetch_records(
        &self,
        sql: &str,
        params: Params,
        op: &str,
    ) -> Result<Vec<StoredRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            let record = row_to_record(&row)
                .map_err(|e| DatabaseError::Serialization(format!("{op} row parse: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    async fn scalar(&self, sql: &str, params: Params, op: &str) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| DatabaseError::Query(format!("{op}: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }

    async fn record_exists(&self, id: &str) -> Result<bool, DatabaseError> {
        let n = self
            .scalar(
                "SELECT COUNT(*) FROM records WHERE id = ?1",
                Params::Positional(vec![Value::Text(id.to_string())]),
                "record_exists",
            )
            .await?;
        Ok(n > 0)
    }

    /// Rows of `(text, count)` pairs.
    async fn counted(&self, sql: &str, op: &str) -> Result<Vec<(String, u64)>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            let label: String = row.get(0).unwrap_or_default();
            let count: i64 = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
            out.push((label, count.max(0) as u64));
        }
        Ok(out)
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Record columns plus the tag list, joined with U+001F.
const RECORD_COLUMNS: &str = "r.id, r.external_id, r.subject, r.sender, r.date, r.content_type, \
     r.body, r.is_processed, r.imported_at, \
     (SELECT GROUP_CONCAT(c.name, char(31)) FROM record_categories rc \
      JOIN categories c ON c.id = rc.category_id WHERE rc.record_id = r.id)";

/// Newest first; the unknown-date sentinel sorts after every real date.
const NEWEST_FIRST: &str =
    "ORDER BY CASE WHEN r.date = 'unknown date' THEN 1 ELSE 0 END, r.date DESC, r.imported_at DESC";

fn row_to_record(row: &libsql::Row) -> Result<StoredRecord, libsql::Error> {
    let processed: i64 = row.get(7)?;
    let imported_str: String = row.get(8)?;
    let tags: Option<String> = row.get(9).ok();

    let mut categories: Vec<String> = tags
        .map(|t| t.split('\u{1f}').map(str::to_string).collect())
        .unwrap_or_default();
    categories.sort();

    Ok(StoredRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        subject: row.get(2)?,
        sender: row.get(3)?,
        date: row.get(4)?,
        content_type: row.get(5)?,
        body: row.get(6)?,
        is_processed: processed != 0,
        imported_at: parse_datetime(&imported_str),
        categories,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// `%term%` with LIKE wildcards in `term` escaped by `\`.
fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// WHERE clause and positional values for a record filter.
fn filter_clause(filter: &RecordFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut values = Vec::new();

    if let Some(text) = non_empty(&filter.text) {
        clauses.push("(r.subject LIKE ? ESCAPE '\\' OR r.body LIKE ? ESCAPE '\\')");
        let pattern = like_pattern(text);
        values.push(Value::Text(pattern.clone()));
        values.push(Value::Text(pattern));
    }
    if let Some(sender) = non_empty(&filter.sender) {
        clauses.push("r.sender LIKE ? ESCAPE '\\'");
        values.push(Value::Text(like_pattern(sender)));
    }
    if filter.date_from.is_some() || filter.date_to.is_some() {
        clauses.push("r.date != 'unknown date'");
    }
    if let Some(from) = filter.date_from {
        clauses.push("substr(r.date, 1, 10) >= ?");
        values.push(Value::Text(from.format("%Y-%m-%d").to_string()));
    }
    if let Some(to) = filter.date_to {
        clauses.push("substr(r.date, 1, 10) <= ?");
        values.push(Value::Text(to.format("%Y-%m-%d").to_string()));
    }
    if let Some(category) = non_empty(&filter.category) {
        clauses.push(
            "EXISTS (SELECT 1 FROM record_categories rc JOIN categories c ON c.id = rc.category_id \
             WHERE rc.record_id = r.id AND c.name = ?)",
        );
        values.push(Value::Text(category.to_string()));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RecordStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Records ─────────────────────────────────────────────────────

    async fn insert_if_absent(
        &self,
        record: &NormalizedRecord,
    ) -> Result<InsertOutcome, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "INSERT INTO records (id, external_id, subject, sender, date, content_type, body,
                    is_processed, imported_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)
                 ON CONFLICT(external_id) DO NOTHING",
                params![
                    id.clone(),
                    record.external_id.clone(),
                    record.subject.clone(),
                    record.sender.clone(),
                    record.date.clone(),
                    record.content_type.clone(),
                    record.body.clone(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_if_absent: {e}")))?;

        if affected == 0 {
            debug!(external_id = %record.external_id, "Record already stored, skipping");
            return Ok(InsertOutcome::Skipped);
        }
        debug!(id = %id, external_id = %record.external_id, "Record inserted");
        Ok(InsertOutcome::Inserted(id))
    }

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>, DatabaseError> {
        let mut records = self
            .fetch_records(
                &format!("SELECT {RECORD_COLUMNS} FROM records r WHERE r.id = ?1"),
                Params::Positional(vec![Value::Text(id.to_string())]),
                "get_record",
            )
            .await?;
        Ok(records.pop())
    }

    async fn set_processed(&self, record_id: &str, processed: bool) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE records SET is_processed = ?1 WHERE id = ?2",
                params![i64::from(processed), record_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_processed: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "record".into(),
                id: record_id.to_string(),
            });
        }
        Ok(())
    }

    async fn count_records(&self) -> Result<u64, DatabaseError> {
        let n = self
            .scalar("SELECT COUNT(*) FROM records", Params::None, "count_records")
            .await?;
        Ok(n.max(0) as u64)
    }

    // ── Tags ────────────────────────────────────────────────────────

    async fn tag(&self, record_id: &str, category: &str) -> Result<(), DatabaseError> {
        let category = category.trim();
        if category.is_empty() {
            return Err(DatabaseError::Constraint(
                "category name must not be empty".into(),
            ));
        }
        if !self.record_exists(record_id).await? {
            return Err(DatabaseError::NotFound {
                entity: "record".into(),
                id: record_id.to_string(),
            });
        }

        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO categories (name) VALUES (?1)",
            params![category],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("tag (category): {e}")))?;

        conn.execute(
            "INSERT OR IGNORE INTO record_categories (record_id, category_id)
             SELECT ?1, id FROM categories WHERE name = ?2",
            params![record_id, category],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("tag: {e}")))?;

        debug!(record_id = record_id, category = category, "Record tagged");
        Ok(())
    }

    async fn untag(&self, record_id: &str, category: &str) -> Result<TagRemoval, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM record_categories
                 WHERE record_id = ?1
                   AND category_id = (SELECT id FROM categories WHERE name = ?2)",
                params![record_id, category.trim()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("untag: {e}")))?;

        Ok(if affected == 0 {
            TagRemoval::NotFound
        } else {
            TagRemoval::Removed
        })
    }

    async fn list_categories(&self) -> Result<Vec<CategorySummary>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT c.id, c.name, c.description, COUNT(rc.record_id)
                 FROM categories c
                 LEFT JOIN record_categories rc ON rc.category_id = c.id
                 GROUP BY c.id
                 ORDER BY c.name",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_categories: {e}")))?;

        let mut categories = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_categories: {e}")))?
        {
            let count: i64 = row
                .get(3)
                .map_err(|e| DatabaseError::Query(format!("list_categories: {e}")))?;
            categories.push(CategorySummary {
                id: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("list_categories: {e}")))?,
                name: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("list_categories: {e}")))?,
                description: row.get(2).ok(),
                count: count.max(0) as u64,
            });
        }
        Ok(categories)
    }

    // ── Queries ─────────────────────────────────────────────────────

    async fn query(
        &self,
        filter: &RecordFilter,
        limit: u32,
    ) -> Result<Vec<StoredRecord>, DatabaseError> {
        let (_, limit) = clamp_paging(1, limit);
        let (where_clause, mut values) = filter_clause(filter);
        values.push(Value::Integer(i64::from(limit)));

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r {where_clause} {NEWEST_FIRST} LIMIT ?"
        );
        self.fetch_records(&sql, Params::Positional(values), "query")
            .await
    }

    async fn page(
        &self,
        query: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<StoredRecord>, DatabaseError> {
        let (page, page_size) = clamp_paging(page, page_size);
        let term = query.map(str::trim).filter(|q| !q.is_empty());

        let (where_clause, values) = match term {
            Some(q) => (
                "WHERE (r.subject LIKE ?1 ESCAPE '\\' OR r.sender LIKE ?1 ESCAPE '\\')",
                vec![Value::Text(like_pattern(q))],
            ),
            None => ("", Vec::new()),
        };

        let total = self
            .scalar(
                &format!("SELECT COUNT(*) FROM records r {where_clause}"),
                Params::Positional(values.clone()),
                "page (count)",
            )
            .await?
            .max(0) as u64;

        let offset = i64::from(page - 1) * i64::from(page_size);
        let n = values.len();
        let mut page_values = values;
        page_values.push(Value::Integer(i64::from(page_size)));
        page_values.push(Value::Integer(offset));

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r {where_clause} {NEWEST_FIRST} LIMIT ?{} OFFSET ?{}",
            n + 1,
            n + 2
        );
        let items = self
            .fetch_records(&sql, Params::Positional(page_values), "page")
            .await?;

        Ok(Page::new(items, page, page_size, total))
    }

    async fn page_filtered(
        &self,
        filter: &RecordFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<StoredRecord>, DatabaseError> {
        let (page, page_size) = clamp_paging(page, page_size);
        let (where_clause, values) = filter_clause(filter);

        let total = self
            .scalar(
                &format!("SELECT COUNT(*) FROM records r {where_clause}"),
                Params::Positional(values.clone()),
                "page_filtered (count)",
            )
            .await?
            .max(0) as u64;

        let offset = i64::from(page - 1) * i64::from(page_size);
        let mut page_values = values;
        page_values.push(Value::Integer(i64::from(page_size)));
        page_values.push(Value::Integer(offset));

        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records r {where_clause} {NEWEST_FIRST} LIMIT ? OFFSET ?"
        );
        let items = self
            .fetch_records(&sql, Params::Positional(page_values), "page_filtered")
            .await?;

        Ok(Page::new(items, page, page_size, total))
    }

    async fn statistics(&self) -> Result<Statistics, DatabaseError> {
        let total = self.count_records().await?;
        let processed = self
            .scalar(
                "SELECT COUNT(*) FROM records WHERE is_processed = 1",
                Params::None,
                "statistics (processed)",
            )
            .await?
            .max(0) as u64;

        let per_category = self
            .counted(
                "SELECT c.name, COUNT(rc.record_id) AS n
                 FROM categories c
                 LEFT JOIN record_categories rc ON rc.category_id = c.id
                 GROUP BY c.id
                 ORDER BY n DESC, c.name",
                "statistics (categories)",
            )
            .await?
            .into_iter()
            .map(|(name, count)| CategoryCount { name, count })
            .collect();

        let top_senders = self
            .counted(
                "SELECT sender, COUNT(*) AS n FROM records
                 GROUP BY sender ORDER BY n DESC, sender LIMIT 5",
                "statistics (senders)",
            )
            .await?
            .into_iter()
            .map(|(sender, count)| SenderCount { sender, count })
            .collect();

        let recent_days = self
            .counted(
                "SELECT substr(date, 1, 10) AS day, COUNT(*) FROM records
                 WHERE date != 'unknown date'
                 GROUP BY day ORDER BY day DESC LIMIT 5",
                "statistics (days)",
            )
            .await?
            .into_iter()
            .map(|(day, count)| DayCount { day, count })
            .collect();

        Ok(Statistics {
            total,
            processed,
            unprocessed: total.saturating_sub(processed),
            per_category,
            top_senders,
            recent_days,
        })
    }
}
