//! Loading the JSON hand-off document into the record store.

use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::ImportError;
use crate::ingest::date;
use crate::ingest::types::NormalizedRecord;
use crate::store::traits::{InsertOutcome, RecordStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    pub skipped: usize,
}

/// Read a JSON array of records. Legacy `id`/`from` field names are accepted.
pub fn load_document(path: &Path) -> Result<Vec<NormalizedRecord>, ImportError> {
    let text = std::fs::read_to_string(path).map_err(|source| ImportError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Insert each record unless its external id is already stored.
///
/// Dates not in canonical form (older documents wrote a localized sentinel
/// or a raw tuple) are stored as the unknown-date sentinel.
pub async fn import_records(
    store: &dyn RecordStore,
    records: &[NormalizedRecord],
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();
    for record in records {
        let date = date::canonical_or_unknown(&record.date);
        let outcome = if date == record.date {
            store.insert_if_absent(record).await?
        } else {
            debug!(
                external_id = %record.external_id,
                date = %record.date,
                "Non-canonical date, storing as unknown"
            );
            store
                .insert_if_absent(&NormalizedRecord {
                    date,
                    ..record.clone()
                })
                .await?
        };
        match outcome {
            InsertOutcome::Inserted(_) => summary.added += 1,
            InsertOutcome::Skipped => summary.skipped += 1,
        }
    }
    info!(
        added = summary.added,
        skipped = summary.skipped,
        "Import complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::NaiveDate;

    use super::*;
    use crate::ingest::date::UNKNOWN_DATE;
    use crate::store::{LibSqlBackend, RecordFilter};

    fn record(id: &str) -> NormalizedRecord {
        NormalizedRecord {
            external_id: id.into(),
            subject: format!("subject {id}"),
            sender: "a@b.c".into(),
            date: "2024-01-01 10:00:00".into(),
            body: "hello".into(),
            content_type: "text/plain".into(),
        }
    }

    #[tokio::test]
    async fn reimport_counts_skips() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let records = vec![record("1"), record("2")];

        let first = import_records(&db, &records).await.unwrap();
        assert_eq!(first, ImportSummary { added: 2, skipped: 0 });

        let second = import_records(&db, &[record("2"), record("3")]).await.unwrap();
        assert_eq!(second, ImportSummary { added: 1, skipped: 1 });
        assert_eq!(db.count_records().await.unwrap(), 3);
    }

    #[test]
    fn load_legacy_document() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": "5", "subject": "Тест", "from": "x@y.z", "date": "unknown date", "body": "b"}}]"#
        )
        .unwrap();

        let records = load_document(file.path()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id, "5");
        assert_eq!(records[0].subject, "Тест");
        assert_eq!(records[0].sender, "x@y.z");
    }

    #[tokio::test]
    async fn legacy_dates_sort_and_filter_as_unknown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "1", "subject": "a", "from": "x@y.z", "date": "2023-05-01 10:00:00", "body": "b"}},
                {{"id": "2", "subject": "b", "from": "x@y.z", "date": "Неизвестная дата", "body": "b"}},
                {{"id": "3", "subject": "c", "from": "x@y.z", "date": "(2023, 5, 2, 9, 0, 0, 0, 1, -1)", "body": "b"}}
            ]"#
        )
        .unwrap();

        let db = LibSqlBackend::new_memory().await.unwrap();
        let records = load_document(file.path()).unwrap();
        import_records(&db, &records).await.unwrap();

        let all = db.query(&RecordFilter::default(), 10).await.unwrap();
        let order: Vec<(&str, &str)> = all
            .iter()
            .map(|r| (r.external_id.as_str(), r.date.as_str()))
            .collect();
        assert_eq!(order[0], ("1", "2023-05-01 10:00:00"));
        assert!(order[1..].iter().all(|(_, d)| *d == UNKNOWN_DATE));

        let filter = RecordFilter {
            date_from: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..RecordFilter::default()
        };
        assert!(db.query(&filter, 10).await.unwrap().is_empty());

        let stats = db.statistics().await.unwrap();
        assert_eq!(stats.recent_days.len(), 1);
        assert_eq!(stats.recent_days[0].day, "2023-05-01");
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_document(Path::new("/nonexistent/records.json")).unwrap_err();
        assert!(matches!(err, ImportError::Io { .. }));
    }

    #[test]
    fn malformed_document_is_json_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            load_document(file.path()),
            Err(ImportError::Json(_))
        ));
    }
}
