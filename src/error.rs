//! Error types for mailstash.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// IMAP session errors.
///
/// `Connection`, `AuthFailed`, `Timeout`, `Folder` and `Search` abort a batch.
/// `Fetch` is scoped to a single message.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication failed for {address}: {reason}")]
    AuthFailed { address: String, reason: String },

    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    #[error("Cannot select folder {name}: {reason}")]
    Folder { name: String, reason: String },

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Fetch of message {id} failed: {reason}")]
    Fetch { id: String, reason: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("Session is closed")]
    Closed,
}

impl MailboxError {
    /// Classify an I/O error raised while talking to `host` during `operation`.
    pub fn from_io(host: &str, operation: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => Self::Timeout {
                operation: operation.to_string(),
            },
            _ => Self::Connection {
                host: host.to_string(),
                reason: format!("{operation}: {err}"),
            },
        }
    }
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors while loading or importing a record document.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed record document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error during import: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for mailstash.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store(fail: bool) -> Result<()> {
        if fail {
            Err(DatabaseError::Pool("locked".into()))?;
        }
        Ok(())
    }

    fn load(path: &str) -> Result<String> {
        Ok(std::fs::read_to_string(path)?)
    }

    #[test]
    fn concern_errors_convert_into_top_level() {
        assert!(open_store(false).is_ok());
        assert!(matches!(open_store(true), Err(Error::Database(DatabaseError::Pool(_)))));
        assert!(matches!(load("/nonexistent/mailstash.json"), Err(Error::Io(_))));

        let err: Error = ConfigError::MissingEnvVar("MAILSTASH_IMAP_HOST".into()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: MAILSTASH_IMAP_HOST"
        );
    }

    #[tokio::test]
    async fn panicked_task_is_task_error() {
        let joined = tokio::task::spawn_blocking(|| -> u8 { panic!("boom") }).await;
        let err: Error = joined.unwrap_err().into();
        assert!(matches!(err, Error::Task(_)));
    }

    #[test]
    fn io_timeout_is_distinguishable() {
        let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let mapped = MailboxError::from_io("imap.test.com", "fetch", err);
        assert!(matches!(mapped, MailboxError::Timeout { ref operation } if operation == "fetch"));
    }

    #[test]
    fn io_refused_is_connection_error() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        let mapped = MailboxError::from_io("imap.test.com", "connect", err);
        match mapped {
            MailboxError::Connection { host, reason } => {
                assert_eq!(host, "imap.test.com");
                assert!(reason.starts_with("connect"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
