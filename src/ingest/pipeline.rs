//! Batch ingestion: open a session, fetch newest-first, normalize.

use std::io::Write;
use std::ops::{Deref, DerefMut};

use tracing::{info, warn};

use crate::error::MailboxError;
use crate::ingest::date::{self, UNKNOWN_DATE};
use crate::ingest::mailbox::{Mailbox, MailboxConnector, SearchCriteria, SessionParams};
use crate::ingest::mime::{self, BODY_PLACEHOLDER};
use crate::ingest::types::{NormalizedRecord, RawMessage};

/// What to ingest in one run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub folder: String,
    pub criteria: SearchCriteria,
    pub max_messages: usize,
}

/// Outcome of one run. Skipped messages do not make the run fail.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub records: Vec<NormalizedRecord>,
    pub skipped: usize,
    pub skipped_ids: Vec<String>,
    /// Number of ids the search returned, before the cap.
    pub listed: usize,
}

/// Closes the wrapped session when dropped, including during unwinding.
struct SessionGuard<M: Mailbox>(M);

impl<M: Mailbox> Deref for SessionGuard<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.0
    }
}

impl<M: Mailbox> DerefMut for SessionGuard<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.0
    }
}

impl<M: Mailbox> Drop for SessionGuard<M> {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Run one ingestion batch.
///
/// Open, select and search failures abort the batch. A failed fetch is
/// logged, counted and skipped.
pub fn run<C: MailboxConnector>(
    connector: &C,
    params: &SessionParams,
    options: &IngestOptions,
) -> Result<IngestReport, MailboxError> {
    let mut session = SessionGuard(connector.open(params)?);
    session.select_folder(&options.folder)?;

    let mut ids = session.list_ids(&options.criteria)?;
    let mut report = IngestReport {
        listed: ids.len(),
        ..IngestReport::default()
    };
    ids.reverse();

    for id in ids.into_iter().take(options.max_messages) {
        match session.fetch_raw(&id) {
            Ok(raw) => report.records.push(normalize_message(&raw)),
            Err(e) => {
                warn!(id = %id, error = %e, "Skipping message");
                report.skipped += 1;
                report.skipped_ids.push(id);
            }
        }
    }

    info!(
        folder = %options.folder,
        listed = report.listed,
        fetched = report.records.len(),
        skipped = report.skipped,
        "Ingestion batch complete"
    );
    Ok(report)
}

/// Turn a raw payload into a record. Always yields a record.
pub fn normalize_message(raw: &RawMessage) -> NormalizedRecord {
    match mailparse::parse_mail(&raw.bytes) {
        Ok(mail) => {
            let body = mime::extract_body(&mail);
            let date_header = mime::header_text(&mail, "Date");
            NormalizedRecord {
                external_id: raw.id.clone(),
                subject: mime::header_text(&mail, "Subject"),
                sender: mime::header_text(&mail, "From"),
                date: date::normalize(Some(&date_header)),
                body: body.text,
                content_type: body.content_type,
            }
        }
        Err(e) => {
            warn!(id = %raw.id, error = %e, "Unparseable message, storing placeholder");
            NormalizedRecord {
                external_id: raw.id.clone(),
                subject: String::new(),
                sender: String::new(),
                date: UNKNOWN_DATE.to_string(),
                body: BODY_PLACEHOLDER.to_string(),
                content_type: "text/plain".to_string(),
            }
        }
    }
}

/// Write records as a pretty-printed JSON array, non-ASCII left as is.
pub fn write_document<W: Write>(records: &[NormalizedRecord], mut out: W) -> std::io::Result<()> {
    serde_json::to_writer_pretty(&mut out, records)?;
    out.write_all(b"\n")?;
    out.flush()
}
