//! Inbound IMAP over rustls.
//!
//! A minimal IMAP4rev1 client: LOGIN, SELECT, SEARCH, FETCH `BODY.PEEK[]`,
//! LOGOUT. Messages are never flagged `\Seen`. Blocking; run it on the
//! blocking pool.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::channels::{
    Inbox, InboundMessage, InboxQuery, SNIPPET_MAX_CHARS, strip_html, truncate_chars,
};
use crate::config::ImapConfig;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "imap";
const READ_TIMEOUT: Duration = Duration::from_secs(30);

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

// ── Inbox ───────────────────────────────────────────────────────────

/// IMAP inbox reader.
pub struct ImapInbox {
    config: ImapConfig,
}

impl ImapInbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Inbox for ImapInbox {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn fetch(&self, query: &InboxQuery) -> Result<Vec<InboundMessage>, ChannelError> {
        let config = self.config.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || fetch_messages(&config, &query))
            .await
            .map_err(|e| ChannelError::Fetch(format!("fetch task failed: {e}")))?
    }
}

// ── Search ──────────────────────────────────────────────────────────

/// Accent-fold and lowercase a subject: NFKD, then drop non-ASCII.
pub fn fold_subject(raw: &str) -> String {
    raw.nfkd()
        .filter(char::is_ascii)
        .collect::<String>()
        .to_lowercase()
}

/// Whether the folded subject contains every keyword. No keywords match all.
pub fn matches_campaign_subject(subject: &str, keywords: &[String]) -> bool {
    let folded = fold_subject(subject);
    keywords.iter().all(|k| folded.contains(k.as_str()))
}

/// IMAP `SEARCH` criteria: `SINCE <date>`, narrowed by an `OR SUBJECT` chain
/// when keywords are given.
pub fn build_search_criteria(query: &InboxQuery) -> String {
    let since = format!("SINCE {}", query.since.format("%d-%b-%Y"));
    let subjects: Vec<String> = query
        .subject_keywords
        .iter()
        .filter(|k| !k.trim().is_empty())
        .map(|k| format!("SUBJECT {}", quote(k)))
        .collect();

    match subjects.split_last() {
        None => since,
        Some((last, rest)) => {
            let mut chain = last.clone();
            for key in rest.iter().rev() {
                chain = format!("OR {key} {chain}");
            }
            format!("{since} {chain}")
        }
    }
}

/// IMAP quoted string.
fn quote(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Message sequence numbers from `* SEARCH` lines.
fn parse_search_ids(lines: &[String]) -> Vec<u32> {
    lines
        .iter()
        .filter_map(|l| l.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace().filter_map(|id| id.parse().ok()))
        .collect()
}

/// Byte count of a trailing `{N}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let open = trimmed.rfind('{')?;
    trimmed
        .strip_suffix('}')?
        .get(open + 1..)?
        .parse()
        .ok()
}

// ── Session ─────────────────────────────────────────────────────────

/// Tagged command response.
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    ok: bool,
}

struct Session<S = TlsStream> {
    stream: BufReader<S>,
    next_tag: u32,
}

impl Session<TlsStream> {
    fn connect(config: &ImapConfig) -> Result<Self, ChannelError> {
        let tls_err = |reason: String| ChannelError::Tls {
            name: CHANNEL_NAME.into(),
            reason,
        };

        let tcp = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            ChannelError::Fetch(format!("cannot connect to {}:{}: {e}", config.host, config.port))
        })?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| ChannelError::Fetch(e.to_string()))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = rustls_pki_types::ServerName::try_from(config.host.clone())
            .map_err(|e| tls_err(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| tls_err(e.to_string()))?;

        let mut session = Self::new(rustls::StreamOwned::new(conn, tcp));
        let greeting = session.read_line()?;
        debug!(greeting = %greeting.trim_end(), "IMAP connected");
        Ok(session)
    }
}

impl<S: Read + Write> Session<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
            next_tag: 1,
        }
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        let n = self
            .stream
            .read_until(b'\n', &mut buf)
            .map_err(|e| ChannelError::Fetch(e.to_string()))?;
        if n == 0 {
            return Err(ChannelError::Fetch("IMAP connection closed".into()));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn command(&mut self, command: &str) -> Result<Response, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.stream.get_mut();
        stream
            .write_all(format!("{tag} {command}\r\n").as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|e| ChannelError::Fetch(e.to_string()))?;

        let done_prefix = format!("{tag} ");
        let mut response = Response {
            lines: Vec::new(),
            literals: Vec::new(),
            ok: false,
        };
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.stream
                    .read_exact(&mut literal)
                    .map_err(|e| ChannelError::Fetch(e.to_string()))?;
                response.literals.push(literal);
            }
            if let Some(status) = line.strip_prefix(&done_prefix) {
                response.ok = status.starts_with("OK");
                response.lines.push(line);
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    /// Close the session. A refused or failed LOGOUT is only logged.
    fn logout(mut self) -> bool {
        match self.command("LOGOUT") {
            Ok(response) if response.ok => {
                debug!("IMAP logout");
                true
            }
            Ok(response) => {
                let status = response.lines.last().map(|l| l.trim_end().to_string());
                debug!(status = status.as_deref().unwrap_or(""), "IMAP logout refused");
                false
            }
            Err(e) => {
                debug!("IMAP logout failed: {e}");
                false
            }
        }
    }
}

// ── Fetch ───────────────────────────────────────────────────────────

fn fetch_messages(config: &ImapConfig, query: &InboxQuery) -> Result<Vec<InboundMessage>, ChannelError> {
    let mut session = Session::connect(config)?;

    let login = session.command(&format!(
        "LOGIN {} {}",
        quote(&config.user),
        quote(config.password.expose_secret())
    ))?;
    if !login.ok {
        return Err(ChannelError::AuthFailed {
            name: CHANNEL_NAME.into(),
            reason: login.lines.last().map(|l| l.trim_end().to_string()).unwrap_or_default(),
        });
    }

    let select = session.command(&format!("SELECT {}", quote(&config.folder)))?;
    if !select.ok {
        return Err(ChannelError::Fetch(format!("cannot select folder {}", config.folder)));
    }

    let criteria = build_search_criteria(query);
    let search = session.command(&format!("SEARCH {criteria}"))?;
    if !search.ok {
        return Err(ChannelError::Fetch(format!("SEARCH {criteria} rejected")));
    }
    let ids = parse_search_ids(&search.lines);
    info!(count = ids.len(), folder = %config.folder, "Inbox messages matched search");

    let parser = MessageParser::default();
    let mut messages = Vec::with_capacity(ids.len());
    for id in ids {
        let fetched = session.command(&format!("FETCH {id} BODY.PEEK[]"))?;
        let Some(raw) = fetched.literals.first() else {
            warn!(id, "FETCH returned no message body");
            continue;
        };
        match parser.parse(raw.as_slice()) {
            Some(parsed) => messages.push(to_inbound(&parsed)),
            None => warn!(id, "Unparseable message skipped"),
        }
    }

    session.logout();
    Ok(messages)
}

fn to_inbound(parsed: &mail_parser::Message<'_>) -> InboundMessage {
    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    let date = parsed.date().and_then(|d| {
        NaiveDate::from_ymd_opt(i32::from(d.year), u32::from(d.month), u32::from(d.day))
            .and_then(|day| {
                day.and_hms_opt(u32::from(d.hour), u32::from(d.minute), u32::from(d.second))
            })
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
    });

    InboundMessage {
        sender,
        subject: parsed.subject().unwrap_or_default().to_string(),
        date,
        snippet: truncate_chars(&extract_text(parsed), SNIPPET_MAX_CHARS),
    }
}

fn extract_text(parsed: &mail_parser::Message<'_>) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}
