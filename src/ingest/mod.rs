//! Mailbox ingestion: fetch raw messages and normalize them into records.

pub mod date;
pub mod mailbox;
pub mod mime;
pub mod pipeline;
pub mod types;

pub use mailbox::{ImapConnector, Mailbox, MailboxConnector, SearchCriteria, SessionParams};
pub use pipeline::{IngestOptions, IngestReport};
pub use types::{NormalizedRecord, RawMessage};
