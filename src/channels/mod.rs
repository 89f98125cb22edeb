//! Mail I/O: outbound SMTP, inbound IMAP, and the operator's terminal.

pub mod cli;
pub mod email;
pub mod imap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::error::ChannelError;

pub use email::SmtpMailer;
pub use imap::ImapInbox;

/// Longest body excerpt kept from an inbound message.
pub const SNIPPET_MAX_CHARS: usize = 500;

// ── Outbound ────────────────────────────────────────────────────────

/// One outbound HTML message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub html_body: String,
    pub bcc: Option<String>,
}

/// Sends messages. Failures are per message; callers decide whether to go on.
#[async_trait]
pub trait MailTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError>;
}

// ── Inbound ─────────────────────────────────────────────────────────

/// What to look for in the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxQuery {
    /// Folded keywords; any of them in the subject is a server-side match.
    pub subject_keywords: Vec<String>,
    pub since: NaiveDate,
}

/// A message read from the inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundMessage {
    /// Sender address as written in `From`.
    pub sender: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
    /// Start of the readable body, at most [`SNIPPET_MAX_CHARS`] characters.
    pub snippet: String,
}

/// Reads messages without marking them seen.
#[async_trait]
pub trait Inbox: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, query: &InboxQuery) -> Result<Vec<InboundMessage>, ChannelError>;
}

// ── Text helpers ────────────────────────────────────────────────────

/// Cut `text` to at most `max` characters, on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Strip HTML tags and collapse whitespace.
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_basic() {
        assert_eq!(strip_html("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn strip_html_separates_blocks() {
        assert_eq!(strip_html("<div>Bonjour</div><div>Merci</div>"), "Bonjour Merci");
    }

    #[test]
    fn strip_html_empty() {
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("réponse", 2), "ré");
        assert_eq!(truncate_chars("ok", 10), "ok");
    }
}
