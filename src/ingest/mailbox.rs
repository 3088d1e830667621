//! Blocking IMAP client: login, select, UID search and UID fetch.
//!
//! Sessions are synchronous (`TcpStream` + rustls `StreamOwned`). Async
//! callers run them inside `tokio::task::spawn_blocking`.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, trace, warn};

use crate::error::MailboxError;
use crate::ingest::types::RawMessage;

/// Largest `{n}` literal accepted from the server.
pub const MAX_LITERAL_BYTES: usize = 64 * 1024 * 1024;

/// A mailbox that can enumerate and fetch raw messages.
pub trait Mailbox {
    /// Select the folder that later searches and fetches operate on.
    fn select_folder(&mut self, name: &str) -> Result<(), MailboxError>;

    /// UIDs matching `criteria`, in server order (oldest first).
    fn list_ids(&mut self, criteria: &SearchCriteria) -> Result<Vec<String>, MailboxError>;

    /// Fetch one message without setting `\Seen`.
    fn fetch_raw(&mut self, id: &str) -> Result<RawMessage, MailboxError>;

    /// Release the session. Never fails; safe to call repeatedly.
    fn close(&mut self);
}

/// Opens authenticated mailbox sessions.
pub trait MailboxConnector {
    type Session: Mailbox;

    fn open(&self, params: &SessionParams) -> Result<Self::Session, MailboxError>;
}

/// Everything needed to open one session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub address: String,
    pub credential: SecretString,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unopened,
    Open,
    FolderSelected,
    Closed,
}

// ── Search criteria ─────────────────────────────────────────────────

/// Which messages to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchCriteria {
    All,
    Unseen,
    Since(NaiveDate),
    /// Passed to the server verbatim.
    Raw(String),
}

impl SearchCriteria {
    /// Render as IMAP search keys.
    pub fn to_imap(&self) -> String {
        match self {
            Self::All => "ALL".to_string(),
            Self::Unseen => "UNSEEN".to_string(),
            Self::Since(date) => format!("SINCE {}", date.format("%-d-%b-%Y")),
            Self::Raw(raw) => raw.clone(),
        }
    }
}

impl FromStr for SearchCriteria {
    type Err = String;

    /// Accepts `all`, `unseen`, `since:YYYY-MM-DD` or raw IMAP search keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(['\r', '\n']) {
            return Err("search criteria must be a single line".to_string());
        }
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        if s.eq_ignore_ascii_case("unseen") {
            return Ok(Self::Unseen);
        }
        if let Some(date) = s.strip_prefix("since:") {
            return NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
                .map(Self::Since)
                .map_err(|e| format!("invalid date '{date}': {e}"));
        }
        Ok(Self::Raw(s.to_string()))
    }
}

// ── Wire responses ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ok,
    No,
    Bad,
}

/// One untagged response; `{n}` literals are kept out of `line`.
#[derive(Debug, Default)]
struct Untagged {
    line: String,
    literals: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct Response {
    status: Status,
    text: String,
    untagged: Vec<Untagged>,
}

// ── Session ─────────────────────────────────────────────────────────

/// An IMAP session over any byte stream.
pub struct ImapSession<S: Read + Write> {
    stream: BufReader<S>,
    next_tag: u32,
    state: SessionState,
    host: String,
}

impl<S: Read + Write> ImapSession<S> {
    /// Read the greeting and authenticate with LOGIN.
    pub fn login(
        stream: S,
        host: &str,
        address: &str,
        credential: &SecretString,
    ) -> Result<Self, MailboxError> {
        let mut session = Self {
            stream: BufReader::new(stream),
            next_tag: 1,
            state: SessionState::Unopened,
            host: host.to_string(),
        };

        let greeting = session.read_line("greeting")?;
        let greeting = String::from_utf8_lossy(&greeting);
        let greeting = greeting.trim_end();
        if greeting.starts_with("* BYE") {
            return Err(MailboxError::Connection {
                host: host.to_string(),
                reason: format!("server refused connection: {greeting}"),
            });
        }
        if !(greeting.starts_with("* OK") || greeting.starts_with("* PREAUTH")) {
            return Err(MailboxError::Protocol(format!("unexpected greeting: {greeting}")));
        }

        let auth_failed = |reason: String| MailboxError::AuthFailed {
            address: address.to_string(),
            reason,
        };
        let (Some(user), Some(pass)) = (quote(address), quote(credential.expose_secret())) else {
            return Err(auth_failed("credentials contain line breaks".to_string()));
        };

        let command = format!("LOGIN {user} {pass}");
        let redacted = format!("LOGIN {user} \"****\"");
        let resp = session.exchange("login", &command, &redacted)?;
        if resp.status != Status::Ok {
            return Err(auth_failed(resp.text));
        }

        session.state = SessionState::Open;
        debug!(host = host, address = address, "IMAP login succeeded");
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn command(&mut self, operation: &str, command: &str) -> Result<Response, MailboxError> {
        self.exchange(operation, command, command)
    }

    /// Send one tagged command and collect everything up to its completion.
    fn exchange(
        &mut self,
        operation: &str,
        command: &str,
        logged: &str,
    ) -> Result<Response, MailboxError> {
        if self.state == SessionState::Closed {
            return Err(MailboxError::Closed);
        }

        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;
        trace!(tag = %tag, command = logged, "IMAP >");

        let line = format!("{tag} {command}\r\n");
        let sent = self
            .stream
            .get_mut()
            .write_all(line.as_bytes())
            .and_then(|()| self.stream.get_mut().flush());
        if let Err(e) = sent {
            self.state = SessionState::Closed;
            return Err(MailboxError::from_io(&self.host, operation, e));
        }

        let tag_prefix = format!("{tag} ");
        let mut untagged = Vec::new();
        loop {
            let raw = self.read_line(operation)?;
            let text = String::from_utf8_lossy(&raw).trim_end().to_string();

            if let Some(rest) = text.strip_prefix(&tag_prefix) {
                let (word, remainder) = rest.split_once(' ').unwrap_or((rest, ""));
                let status = match word.to_ascii_uppercase().as_str() {
                    "OK" => Status::Ok,
                    "NO" => Status::No,
                    "BAD" => Status::Bad,
                    _ => {
                        return Err(MailboxError::Protocol(format!(
                            "malformed completion: {text}"
                        )));
                    }
                };
                trace!(tag = %tag, status = ?status, "IMAP <");
                return Ok(Response {
                    status,
                    text: remainder.to_string(),
                    untagged,
                });
            }

            if text.starts_with('+') {
                // The server now waits for data we never send.
                self.state = SessionState::Closed;
                return Err(MailboxError::Protocol(format!(
                    "unexpected continuation during {operation}"
                )));
            }

            let entry = self.read_untagged(operation, raw)?;
            untagged.push(entry);
        }
    }

    /// Assemble one untagged response, reading any `{n}` literals byte-exact.
    fn read_untagged(&mut self, operation: &str, first: Vec<u8>) -> Result<Untagged, MailboxError> {
        let mut entry = Untagged::default();
        let mut current = first;
        loop {
            match literal_len(&current) {
                Some(len) => {
                    entry.line.push_str(&String::from_utf8_lossy(&current));
                    if len > MAX_LITERAL_BYTES {
                        self.state = SessionState::Closed;
                        return Err(MailboxError::Protocol(format!(
                            "{operation}: literal of {len} bytes exceeds {MAX_LITERAL_BYTES}"
                        )));
                    }
                    let mut literal = Vec::new();
                    let read = (&mut self.stream)
                        .take(len as u64)
                        .read_to_end(&mut literal)
                        .and_then(|n| {
                            if n == len {
                                Ok(())
                            } else {
                                Err(std::io::Error::new(
                                    std::io::ErrorKind::UnexpectedEof,
                                    format!("literal truncated at {n} of {len} bytes"),
                                ))
                            }
                        });
                    if let Err(e) = read {
                        self.state = SessionState::Closed;
                        return Err(MailboxError::from_io(&self.host, operation, e));
                    }
                    entry.literals.push(literal);
                    current = self.read_line(operation)?;
                }
                None => {
                    entry.line.push_str(String::from_utf8_lossy(&current).trim_end());
                    return Ok(entry);
                }
            }
        }
    }

    fn read_line(&mut self, operation: &str) -> Result<Vec<u8>, MailboxError> {
        let mut buf = Vec::new();
        match self.stream.read_until(b'\n', &mut buf) {
            Ok(0) => {
                self.state = SessionState::Closed;
                Err(MailboxError::Connection {
                    host: self.host.clone(),
                    reason: format!("{operation}: connection closed by server"),
                })
            }
            Ok(_) => Ok(buf),
            Err(e) => {
                self.state = SessionState::Closed;
                Err(MailboxError::from_io(&self.host, operation, e))
            }
        }
    }
}

impl<S: Read + Write> Mailbox for ImapSession<S> {
    fn select_folder(&mut self, name: &str) -> Result<(), MailboxError> {
        let folder_error = |reason: String| MailboxError::Folder {
            name: name.to_string(),
            reason,
        };
        let Some(quoted) = quote(name) else {
            return Err(folder_error("folder name contains line breaks".to_string()));
        };

        let resp = self.command("select", &format!("SELECT {quoted}"))?;
        if resp.status != Status::Ok {
            return Err(folder_error(resp.text));
        }
        self.state = SessionState::FolderSelected;
        debug!(folder = name, "Folder selected");
        Ok(())
    }

    fn list_ids(&mut self, criteria: &SearchCriteria) -> Result<Vec<String>, MailboxError> {
        match self.state {
            SessionState::FolderSelected => {}
            SessionState::Closed => return Err(MailboxError::Closed),
            _ => return Err(MailboxError::Search("no folder selected".to_string())),
        }

        let resp = self.command("search", &format!("UID SEARCH {}", criteria.to_imap()))?;
        if resp.status != Status::Ok {
            return Err(MailboxError::Search(resp.text));
        }

        let ids: Vec<String> = resp
            .untagged
            .iter()
            .filter_map(|u| u.line.strip_prefix("* SEARCH"))
            .flat_map(str::split_whitespace)
            .filter(|tok| tok.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_string)
            .collect();
        debug!(count = ids.len(), criteria = %criteria.to_imap(), "UID search complete");
        Ok(ids)
    }

    fn fetch_raw(&mut self, id: &str) -> Result<RawMessage, MailboxError> {
        let fetch_error = |reason: &str| MailboxError::Fetch {
            id: id.to_string(),
            reason: reason.to_string(),
        };
        if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(fetch_error("not a UID"));
        }

        let resp = self.command("fetch", &format!("UID FETCH {id} (BODY.PEEK[])"))?;
        if resp.status != Status::Ok {
            return Err(fetch_error(&resp.text));
        }

        let bytes = resp
            .untagged
            .into_iter()
            .filter(|u| u.line.contains("FETCH"))
            .find_map(|u| u.literals.into_iter().next())
            .ok_or_else(|| fetch_error("no message body returned"))?;

        trace!(id = id, size = bytes.len(), "Fetched message");
        Ok(RawMessage {
            id: id.to_string(),
            bytes,
        })
    }

    fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state == SessionState::FolderSelected {
            if let Err(e) = self.command("close", "CLOSE") {
                warn!(host = %self.host, error = %e, "IMAP CLOSE failed");
            }
        }
        if self.state != SessionState::Closed {
            if let Err(e) = self.command("logout", "LOGOUT") {
                warn!(host = %self.host, error = %e, "IMAP LOGOUT failed");
            }
        }
        self.state = SessionState::Closed;
        debug!(host = %self.host, "IMAP session closed");
    }
}

impl<S: Read + Write> Drop for ImapSession<S> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Quote an IMAP string argument. `None` if it cannot be sent as a quoted string.
fn quote(s: &str) -> Option<String> {
    if s.contains(['\r', '\n']) {
        return None;
    }
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    Some(format!("\"{escaped}\""))
}

/// Length of a `{n}` literal announced at the end of `line`.
fn literal_len(line: &[u8]) -> Option<usize> {
    let line = line.strip_suffix(b"\r\n").or_else(|| line.strip_suffix(b"\n"))?;
    let inner = line.strip_suffix(b"}")?;
    let open = inner.iter().rposition(|&b| b == b'{')?;
    let digits = std::str::from_utf8(&inner[open + 1..]).ok()?;
    digits.parse().ok()
}

// ── Network transport ───────────────────────────────────────────────

/// TCP transport, optionally wrapped in TLS.
pub enum ImapStream {
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
    Plain(TcpStream),
}

impl Read for ImapStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            ImapStream::Tls(s) => s.read(buf),
            ImapStream::Plain(s) => s.read(buf),
        }
    }
}

impl Write for ImapStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            ImapStream::Tls(s) => s.write(buf),
            ImapStream::Plain(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            ImapStream::Tls(s) => s.flush(),
            ImapStream::Plain(s) => s.flush(),
        }
    }
}

/// Connects to a real IMAP server.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImapConnector;

impl ImapConnector {
    fn connect_tcp(params: &SessionParams) -> Result<TcpStream, MailboxError> {
        let addrs = (params.host.as_str(), params.port)
            .to_socket_addrs()
            .map_err(|e| MailboxError::from_io(&params.host, "resolve", e))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, params.timeout) {
                Ok(tcp) => {
                    let timeouts = tcp
                        .set_read_timeout(Some(params.timeout))
                        .and_then(|()| tcp.set_write_timeout(Some(params.timeout)));
                    timeouts.map_err(|e| MailboxError::from_io(&params.host, "connect", e))?;
                    return Ok(tcp);
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(match last_err {
            Some(e) => MailboxError::from_io(&params.host, "connect", e),
            None => MailboxError::Connection {
                host: params.host.clone(),
                reason: "no addresses resolved".to_string(),
            },
        })
    }

    fn wrap_tls(params: &SessionParams, tcp: TcpStream) -> Result<ImapStream, MailboxError> {
        let tls_error = |reason: String| MailboxError::Connection {
            host: params.host.clone(),
            reason,
        };

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_error(format!("TLS config: {e}")))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        let server_name = rustls_pki_types::ServerName::try_from(params.host.clone())
            .map_err(|e| tls_error(format!("invalid server name: {e}")))?;
        let conn = rustls::ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| tls_error(format!("TLS setup: {e}")))?;

        Ok(ImapStream::Tls(Box::new(rustls::StreamOwned::new(conn, tcp))))
    }
}

impl MailboxConnector for ImapConnector {
    type Session = ImapSession<ImapStream>;

    fn open(&self, params: &SessionParams) -> Result<Self::Session, MailboxError> {
        let tcp = Self::connect_tcp(params)?;
        let stream = if params.tls {
            Self::wrap_tls(params, tcp)?
        } else {
            ImapStream::Plain(tcp)
        };

        let session = ImapSession::login(stream, &params.host, &params.address, &params.credential)?;
        info!(
            host = %params.host,
            port = params.port,
            tls = params.tls,
            "IMAP session opened"
        );
        Ok(session)
    }
}
