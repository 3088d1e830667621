//! Configuration types, built from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::ingest::mailbox::{SearchCriteria, SessionParams};
use crate::ingest::pipeline::IngestOptions;

/// Mailbox connection and batch settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub address: String,
    pub password: SecretString,
    pub folder: String,
    pub search: SearchCriteria,
    pub max_messages: usize,
    pub timeout: Duration,
}

impl MailboxConfig {
    /// Build config from `MAILSTASH_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let host = required("MAILSTASH_IMAP_HOST")?;
        let address = required("MAILSTASH_ADDRESS")?;
        let password = SecretString::from(required("MAILSTASH_PASSWORD")?);

        let port = parse_or(&lookup, "MAILSTASH_IMAP_PORT", 993_u16)?;
        let tls = parse_or(&lookup, "MAILSTASH_IMAP_TLS", true)?;
        let timeout_secs = parse_or(&lookup, "MAILSTASH_IMAP_TIMEOUT_SECS", 30_u64)?;

        let max_messages = parse_or(&lookup, "MAILSTASH_MAX_MESSAGES", 10_usize)?;
        if max_messages == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MAILSTASH_MAX_MESSAGES".into(),
                message: "must be a positive integer".into(),
            });
        }

        let folder = lookup("MAILSTASH_FOLDER")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "INBOX".to_string());

        let search = match lookup("MAILSTASH_SEARCH") {
            Some(raw) => raw.parse().map_err(|message| ConfigError::InvalidValue {
                key: "MAILSTASH_SEARCH".into(),
                message,
            })?,
            None => SearchCriteria::All,
        };

        Ok(Self {
            host,
            port,
            tls,
            address,
            password,
            folder,
            search,
            max_messages,
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    /// Connection parameters for one mailbox session.
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            host: self.host.clone(),
            port: self.port,
            tls: self.tls,
            address: self.address.clone(),
            credential: self.password.clone(),
            timeout: self.timeout,
        }
    }

    /// Batch options for one pipeline run.
    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            folder: self.folder.clone(),
            criteria: self.search.clone(),
            max_messages: self.max_messages,
        }
    }
}

/// Record store location.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("MAILSTASH_DB_PATH")
            .unwrap_or_else(|_| "./data/mailstash.db".to_string());
        Self {
            db_path: PathBuf::from(db_path),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw = std::env::var("MAILSTASH_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
        let addr = raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: "MAILSTASH_HTTP_ADDR".into(),
            message: format!("{e}"),
        })?;
        Ok(Self { addr })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("MAILSTASH_IMAP_HOST", "imap.test.com"),
        ("MAILSTASH_ADDRESS", "user@test.com"),
        ("MAILSTASH_PASSWORD", "hunter2"),
    ];

    #[test]
    fn defaults_applied() {
        let cfg = MailboxConfig::from_lookup(lookup_from(BASE)).unwrap();
        assert_eq!(cfg.port, 993);
        assert!(cfg.tls);
        assert_eq!(cfg.folder, "INBOX");
        assert_eq!(cfg.search, SearchCriteria::All);
        assert_eq!(cfg.max_messages, 10);
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.password.expose_secret(), "hunter2");
    }

    #[test]
    fn missing_host_is_reported() {
        let err = MailboxConfig::from_lookup(lookup_from(&BASE[1..])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "MAILSTASH_IMAP_HOST"));
    }

    #[test]
    fn zero_max_messages_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("MAILSTASH_MAX_MESSAGES", "0"));
        let err = MailboxConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn bad_port_rejected() {
        let mut pairs = BASE.to_vec();
        pairs.push(("MAILSTASH_IMAP_PORT", "imap"));
        assert!(MailboxConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn overrides_parsed() {
        let mut pairs = BASE.to_vec();
        pairs.extend([
            ("MAILSTASH_IMAP_PORT", "143"),
            ("MAILSTASH_IMAP_TLS", "false"),
            ("MAILSTASH_FOLDER", "Archive"),
            ("MAILSTASH_SEARCH", "unseen"),
            ("MAILSTASH_MAX_MESSAGES", "25"),
        ]);
        let cfg = MailboxConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(cfg.port, 143);
        assert!(!cfg.tls);
        assert_eq!(cfg.folder, "Archive");
        assert_eq!(cfg.search, SearchCriteria::Unseen);
        assert_eq!(cfg.ingest_options().max_messages, 25);
    }

    #[test]
    fn debug_output_redacts_password() {
        let cfg = MailboxConfig::from_lookup(lookup_from(BASE)).unwrap();
        assert!(!format!("{cfg:?}").contains("hunter2"));
    }
}
