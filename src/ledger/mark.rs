//! Reply marking: the single mutation behind manual, bulk, interactive and
//! automatic marking.

use tracing::info;

use super::Ledger;
use super::contact::ContactStatus;
use crate::error::LedgerError;

/// How a mark treats the existing notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotesPolicy {
    /// Overwrite the notes (operator marking).
    #[default]
    Replace,
    /// Only write when the notes are empty (automatic marking).
    FillIfEmpty,
}

/// A request to record a reply outcome on one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkRequest {
    pub email: String,
    pub answered: bool,
    /// New status; `None` leaves it unchanged.
    pub status: Option<ContactStatus>,
    /// New notes; `None` or empty leaves them unchanged.
    pub notes: Option<String>,
    pub notes_policy: NotesPolicy,
}

impl MarkRequest {
    /// The contact replied.
    pub fn responded(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            answered: true,
            status: Some(ContactStatus::Responded),
            notes: None,
            notes_policy: NotesPolicy::Replace,
        }
    }

    /// The contact declined.
    pub fn not_interested(email: impl Into<String>) -> Self {
        Self {
            status: Some(ContactStatus::NotInterested),
            ..Self::responded(email)
        }
    }

    pub fn with_status(mut self, status: Option<ContactStatus>) -> Self {
        self.status = status;
        self
    }

    pub fn with_answered(mut self, answered: bool) -> Self {
        self.answered = answered;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>, policy: NotesPolicy) -> Self {
        self.notes = Some(notes.into());
        self.notes_policy = policy;
        self
    }
}

/// What a mark did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkOutcome {
    pub email: String,
    pub changed: bool,
    pub status: ContactStatus,
}

impl Ledger {
    /// Apply a mark. Operator marks may set any status, including moving a
    /// contact out of a terminal one.
    pub fn apply_mark(&mut self, request: &MarkRequest) -> Result<MarkOutcome, LedgerError> {
        let contact = self
            .get_mut(&request.email)
            .ok_or_else(|| LedgerError::NotFound(request.email.trim().to_string()))?;

        let mut changed = false;
        if contact.answered != request.answered {
            contact.answered = request.answered;
            changed = true;
        }
        if let Some(status) = request.status
            && contact.status != status
        {
            contact.status = status;
            changed = true;
        }
        if let Some(notes) = request.notes.as_deref().map(str::trim)
            && !notes.is_empty()
        {
            let write = match request.notes_policy {
                NotesPolicy::Replace => contact.notes != notes,
                NotesPolicy::FillIfEmpty => contact.notes.is_empty(),
            };
            if write {
                contact.notes = notes.to_string();
                changed = true;
            }
        }

        if changed {
            info!(email = %contact.email, status = %contact.status, answered = contact.answered, "Contact marked");
        }
        Ok(MarkOutcome {
            email: contact.email.clone(),
            changed,
            status: contact.status,
        })
    }
}

/// Parse an email list file: one address per line, blank lines and `#`
/// comments ignored, a header line `email` tolerated.
pub fn parse_email_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| !line.eq_ignore_ascii_case("email"))
        .map(super::normalize_email)
        .collect()
}

/// Mark every listed email `not_interested`. Unknown emails are reported,
/// not fatal.
pub fn mark_bulk_not_interested(
    ledger: &mut Ledger,
    emails: &[String],
) -> (Vec<MarkOutcome>, Vec<String>) {
    let mut marked = Vec::new();
    let mut missing = Vec::new();
    for email in emails {
        match ledger.apply_mark(&MarkRequest::not_interested(email.as_str())) {
            Ok(outcome) => marked.push(outcome),
            Err(_) => missing.push(email.clone()),
        }
    }
    (marked, missing)
}
