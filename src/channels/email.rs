//! IMAP/SMTP mailbox: IMAP over rustls for fetch and tagging, SMTP via lettre
//! for outbound replies.
//!
//! Tags are IMAP keywords (`auto-replied`, `automated`, ...). `fetch_new`
//! searches for unseen messages carrying none of them and fetches with
//! `BODY.PEEK[]`, so a deferred message stays unseen and untagged and is
//! offered again on the next poll.

use std::io::{Read, Write as IoWrite};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as MailMessage, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::channels::mailbox::{MailboxClient, Message, Tag};
use crate::error::{ConfigError, MailboxError};

const IO_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug)]
pub struct EmailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
    /// IMAP folder to poll.
    pub mailbox: String,
}

impl EmailConfig {
    /// Build config from environment variables. `EMAIL_IMAP_HOST` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST")
            .map_err(|_| ConfigError::MissingEnvVar("EMAIL_IMAP_HOST".into()))?;

        let imap_port = parse_port("EMAIL_IMAP_PORT", 993)?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let smtp_port = parse_port("EMAIL_SMTP_PORT", 587)?;

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());
        let mailbox = std::env::var("EMAIL_MAILBOX").unwrap_or_else(|_| "INBOX".to_string());

        Ok(Self {
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
            mailbox,
        })
    }
}

fn parse_port(key: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{e}"),
        }),
        Err(_) => Ok(default),
    }
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// `MailboxClient` backed by a real IMAP + SMTP account.
///
/// Each call opens its own short-lived connection on a blocking thread.
pub struct ImapSmtpMailbox {
    config: Arc<EmailConfig>,
}

impl ImapSmtpMailbox {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn from_address(&self) -> &str {
        &self.config.from_address
    }
}

/// Run a blocking IMAP/SMTP closure off the async runtime.
async fn run_blocking<T, F>(op: &'static str, f: F) -> Result<T, MailboxError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, MailboxError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .unwrap_or_else(|e| Err(MailboxError::transient(op, format!("task panicked: {e}"))))
}

#[async_trait]
impl MailboxClient for ImapSmtpMailbox {
    fn name(&self) -> &str {
        "imap"
    }

    async fn fetch_new(&self) -> Result<Vec<Message>, MailboxError> {
        let cfg = Arc::clone(&self.config);
        let messages = run_blocking("fetch", move || fetch_untagged_imap(&cfg)).await?;
        debug!(count = messages.len(), "Fetched untagged emails");
        Ok(messages)
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
        let cfg = Arc::clone(&self.config);
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        run_blocking("send", move || send_smtp(&cfg, &to, &subject, &body)).await
    }

    async fn apply_tag(&self, message_id: &str, tag: Tag) -> Result<(), MailboxError> {
        let cfg = Arc::clone(&self.config);
        let id = message_id.to_string();
        run_blocking("tag", move || store_keyword_imap(&cfg, &id, tag)).await
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

fn send_smtp(config: &EmailConfig, to: &str, subject: &str, body: &str) -> Result<(), MailboxError> {
    let from: Mailbox = config
        .from_address
        .parse()
        .map_err(|e| MailboxError::permanent("send", format!("Invalid from address: {e}")))?;
    let to_mailbox: Mailbox = to
        .parse()
        .map_err(|e| MailboxError::permanent("send", format!("Invalid to address {to}: {e}")))?;

    let email = MailMessage::builder()
        .from(from)
        .to(to_mailbox)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| MailboxError::permanent("send", format!("Failed to build email: {e}")))?;

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    // 465 is implicit TLS, anything else negotiates STARTTLS.
    let builder = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    }
    .map_err(|e| MailboxError::permanent("send", format!("SMTP relay error: {e}")))?;

    let transport = builder
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(IO_TIMEOUT))
        .build();

    transport.send(&email).map_err(|e| {
        if e.is_permanent() {
            MailboxError::permanent("send", format!("SMTP rejected: {e}"))
        } else {
            MailboxError::transient("send", format!("SMTP send failed: {e}"))
        }
    })?;

    info!(to = %to, "Email sent");
    Ok(())
}

// ── IMAP ────────────────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Tagged response to one IMAP command: untagged lines plus any literals.
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// Minimal synchronous IMAP session over TLS.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn connect(config: &EmailConfig) -> Result<Self, MailboxError> {
        let addr = (config.imap_host.as_str(), config.imap_port)
            .to_socket_addrs()
            .map_err(|e| MailboxError::transient("connect", format!("DNS lookup failed: {e}")))?
            .next()
            .ok_or_else(|| {
                MailboxError::permanent("connect", format!("No address for {}", config.imap_host))
            })?;

        let tcp = TcpStream::connect_timeout(&addr, IO_TIMEOUT)
            .map_err(|e| MailboxError::transient("connect", e.to_string()))?;
        tcp.set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|_| tcp.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|e| MailboxError::transient("connect", e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.imap_host.clone())
            .map_err(|e| MailboxError::permanent("connect", format!("Invalid host name: {e}")))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::permanent("connect", format!("TLS setup failed: {e}")))?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") {
            return Err(MailboxError::transient(
                "connect",
                format!("Unexpected greeting: {}", greeting.trim_end()),
            ));
        }

        let login = format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        );
        session.command(&login).map_err(|e| match e {
            MailboxError::Permanent { reason, .. } => {
                MailboxError::permanent("login", format!("IMAP login rejected: {reason}"))
            }
            other => other,
        })?;

        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.tls.read(&mut byte) {
                Ok(0) => return Err(MailboxError::transient("imap", "connection closed")),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(MailboxError::transient("imap", e.to_string())),
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailboxError> {
        let mut buf = vec![0u8; len];
        self.tls
            .read_exact(&mut buf)
            .map_err(|e| MailboxError::transient("imap", e.to_string()))?;
        Ok(buf)
    }

    /// Send one tagged command and collect everything up to its completion.
    ///
    /// `NO` completions are permanent, `BAD` is a protocol error and also permanent.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, MailboxError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let full = format!("{tag} {cmd}\r\n");
        self.tls
            .write_all(full.as_bytes())
            .and_then(|_| self.tls.flush())
            .map_err(|e| MailboxError::transient("imap", e.to_string()))?;

        let mut response = ImapResponse {
            lines: Vec::new(),
            literals: Vec::new(),
        };
        let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");

        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let literal = self.read_exact(len)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(status) = line.strip_prefix(&format!("{tag} ")) {
                let status = status.trim_end();
                if status.starts_with("OK") {
                    return Ok(response);
                }
                return Err(MailboxError::permanent(
                    "imap",
                    format!("{verb} failed: {status}"),
                ));
            }
            response.lines.push(line);
        }
    }

    /// SELECT the folder, returning its UIDVALIDITY.
    fn select(&mut self, mailbox: &str) -> Result<u32, MailboxError> {
        let resp = self.command(&format!("SELECT {}", quote(mailbox)))?;
        Ok(resp
            .lines
            .iter()
            .find_map(|l| parse_bracket_number(l, "UIDVALIDITY"))
            .unwrap_or(0))
    }

    fn uid_search(&mut self, criteria: &str) -> Result<Vec<u32>, MailboxError> {
        let resp = self.command(&format!("UID SEARCH {criteria}"))?;
        Ok(resp
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().filter_map(|s| s.parse().ok()))
            .collect())
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `{123}\r\n` at the end of a line announces a 123-byte literal.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches("\r\n");
    let open = trimmed.rfind('{')?;
    trimmed
        .strip_suffix('}')
        .and_then(|s| s.get(open + 1..))
        .and_then(|n| n.parse().ok())
}

/// Extract `N` from `* OK [KEY N] ...`.
fn parse_bracket_number(line: &str, key: &str) -> Option<u32> {
    let start = line.find(&format!("[{key} "))? + key.len() + 2;
    let rest = &line[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

/// Search criteria for messages not yet carrying any processing tag.
fn untagged_criteria() -> String {
    let mut criteria = String::from("UNSEEN");
    for tag in Tag::all() {
        criteria.push_str(" UNKEYWORD ");
        criteria.push_str(tag.as_str());
    }
    criteria
}

/// Stable id for messages without a Message-ID header.
fn fallback_id(uidvalidity: u32, uid: u32) -> String {
    format!("uid-{uidvalidity}-{uid}")
}

fn parse_fallback_id(id: &str) -> Option<(u32, u32)> {
    let rest = id.strip_prefix("uid-")?;
    let (validity, uid) = rest.split_once('-')?;
    Some((validity.parse().ok()?, uid.parse().ok()?))
}

fn fetch_untagged_imap(config: &EmailConfig) -> Result<Vec<Message>, MailboxError> {
    let mut session = ImapSession::connect(config)?;
    let uidvalidity = session.select(&config.mailbox)?;
    let uids = session.uid_search(&untagged_criteria())?;

    let mut results = Vec::with_capacity(uids.len());
    for uid in uids {
        let resp = session.command(&format!("UID FETCH {uid} (BODY.PEEK[])"));
        if let Some(msg) = fetched_message(resp, uidvalidity, uid)? {
            results.push(msg);
        }
    }

    session.logout();
    Ok(results)
}

/// Turn one `UID FETCH` result into a message.
///
/// A per-message `NO`/`BAD` (e.g. expunged since the search) or an
/// unparseable body skips that message; only connection errors abort the
/// fetch.
fn fetched_message(
    resp: Result<ImapResponse, MailboxError>,
    uidvalidity: u32,
    uid: u32,
) -> Result<Option<Message>, MailboxError> {
    let resp = match resp {
        Ok(resp) => resp,
        Err(e) if e.is_transient() => return Err(e),
        Err(e) => {
            warn!(uid, error = %e, "FETCH rejected, skipping message");
            return Ok(None);
        }
    };
    let Some(raw) = resp.literals.first() else {
        debug!(uid, "FETCH returned no body literal, skipping");
        return Ok(None);
    };
    let parsed = parse_message(raw, uidvalidity, uid);
    if parsed.is_none() {
        warn!(uid, uidvalidity, "Unparseable message left in mailbox, needs manual review");
    }
    Ok(parsed)
}

fn store_keyword_imap(config: &EmailConfig, message_id: &str, tag: Tag) -> Result<(), MailboxError> {
    let mut session = ImapSession::connect(config)?;
    let uidvalidity = session.select(&config.mailbox)?;

    let uids = match parse_fallback_id(message_id) {
        Some((validity, uid)) if validity == uidvalidity => vec![uid],
        Some(_) => Vec::new(),
        None => session.uid_search(&format!("HEADER Message-ID {}", quote(message_id)))?,
    };

    if uids.is_empty() {
        session.logout();
        return Err(MailboxError::permanent(
            "tag",
            format!("message {message_id} no longer in {}", config.mailbox),
        ));
    }

    let set = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    session.command(&format!("UID STORE {set} +FLAGS ({})", tag.as_str()))?;
    session.logout();

    debug!(id = %message_id, tag = %tag, "Tag applied");
    Ok(())
}

// ── Parsing helpers (public for testing) ────────────────────────────

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a raw RFC 822 message into a pipeline `Message`.
pub fn parse_message(raw: &[u8], uidvalidity: u32, uid: u32) -> Option<Message> {
    let parsed = MessageParser::default().parse(raw)?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".into());

    let subject = parsed.subject().unwrap_or("(no subject)").to_string();

    let body = if let Some(text) = parsed.body_text(0) {
        text.to_string()
    } else if let Some(html) = parsed.body_html(0) {
        strip_html(html.as_ref())
    } else {
        String::new()
    };

    let id = parsed
        .message_id()
        .map(|s| s.to_string())
        .unwrap_or_else(|| fallback_id(uidvalidity, uid));

    let received_at = parsed
        .date()
        .and_then(|d| chrono::DateTime::from_timestamp(d.to_timestamp(), 0))
        .unwrap_or_else(Utc::now);

    Some(Message {
        id,
        sender,
        subject,
        body,
        received_at,
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Jane Doe <jane@corp.com>\r\n\
        To: sales@example.com\r\n\
        Subject: Re: Quick intro\r\n\
        Message-ID: <abc123@corp.com>\r\n\
        Date: Mon, 5 Jan 2026 10:00:00 +0000\r\n\
        Content-Type: text/plain; charset=utf-8\r\n\
        \r\n\
        Thanks, interested. Can we talk?\r\n";

    #[test]
    fn parse_message_extracts_fields() {
        let msg = parse_message(RAW.as_bytes(), 7, 42).unwrap();
        assert_eq!(msg.id, "abc123@corp.com");
        assert_eq!(msg.sender, "jane@corp.com");
        assert_eq!(msg.subject, "Re: Quick intro");
        assert!(msg.body.contains("Can we talk?"));
        assert_eq!(msg.received_at.to_rfc3339(), "2026-01-05T10:00:00+00:00");
    }

    #[test]
    fn parse_message_without_message_id_uses_uid() {
        let raw = "From: a@b.com\r\nSubject: hi\r\n\r\nbody\r\n";
        let msg = parse_message(raw.as_bytes(), 7, 42).unwrap();
        assert_eq!(msg.id, "uid-7-42");
        assert_eq!(parse_fallback_id(&msg.id), Some((7, 42)));
    }

    #[test]
    fn rejected_fetch_skips_only_that_message() {
        let expunged = Err(MailboxError::permanent("imap", "UID FETCH failed: NO no such message"));
        assert!(fetched_message(expunged, 7, 42).unwrap().is_none());

        let dropped = Err(MailboxError::transient("imap", "connection reset"));
        assert!(fetched_message(dropped, 7, 42).is_err());
    }

    #[test]
    fn fetched_literal_becomes_message() {
        let resp = ImapResponse {
            lines: vec!["* 1 FETCH (UID 42 BODY[] {200}\r\n".into()],
            literals: vec![RAW.as_bytes().to_vec()],
        };
        let msg = fetched_message(Ok(resp), 7, 42).unwrap().unwrap();
        assert_eq!(msg.id, "abc123@corp.com");

        let empty = ImapResponse {
            lines: Vec::new(),
            literals: Vec::new(),
        };
        assert!(fetched_message(Ok(empty), 7, 42).unwrap().is_none());
    }

    #[test]
    fn fallback_id_rejects_message_ids() {
        assert_eq!(parse_fallback_id("abc123@corp.com"), None);
        assert_eq!(parse_fallback_id("uid-x-1"), None);
    }

    #[test]
    fn literal_len_detection() {
        assert_eq!(literal_len("* 1 FETCH (UID 5 BODY[] {342}\r\n"), Some(342));
        assert_eq!(literal_len("* SEARCH 1 2 3\r\n"), None);
        assert_eq!(literal_len("A1 OK done\r\n"), None);
    }

    #[test]
    fn uidvalidity_parsing() {
        assert_eq!(
            parse_bracket_number("* OK [UIDVALIDITY 3857529045] UIDs valid\r\n", "UIDVALIDITY"),
            Some(3857529045)
        );
        assert_eq!(parse_bracket_number("* 18 EXISTS\r\n", "UIDVALIDITY"), None);
    }

    #[test]
    fn search_excludes_every_tag() {
        let criteria = untagged_criteria();
        assert!(criteria.starts_with("UNSEEN"));
        for tag in Tag::all() {
            assert!(criteria.contains(&format!("UNKEYWORD {}", tag.as_str())));
        }
    }

    #[test]
    fn quote_escapes() {
        assert_eq!(quote(r#"pa"ss\word"#), r#""pa\"ss\\word""#);
    }

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello</p>"), "Hello");
        assert_eq!(
            strip_html("<div><b>Bold</b> and <i>italic</i></div>"),
            "Bold and italic"
        );
        assert_eq!(strip_html("<p>  Hello   World  </p>"), "Hello World");
    }

    #[test]
    fn config_from_env_requires_host() {
        // SAFETY: only this test touches EMAIL_IMAP_HOST.
        unsafe { std::env::remove_var("EMAIL_IMAP_HOST") };
        assert!(matches!(
            EmailConfig::from_env(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn mailbox_name() {
        let mailbox = ImapSmtpMailbox::new(EmailConfig {
            imap_host: "imap.test.com".into(),
            imap_port: 993,
            smtp_host: "smtp.test.com".into(),
            smtp_port: 587,
            username: "user".into(),
            password: SecretString::from("pass"),
            from_address: "user@test.com".into(),
            mailbox: "INBOX".into(),
        });
        assert_eq!(mailbox.name(), "imap");
        assert_eq!(mailbox.from_address(), "user@test.com");
    }
}
