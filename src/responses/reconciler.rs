//! Matching genuine replies against the ledger.
//!
//! Planning is pure; applying the plan is a separate step and is idempotent.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::channels::InboundMessage;
use crate::ledger::contact::UNKNOWN;
use crate::ledger::{
    Contact, ContactStatus, Ledger, MarkRequest, NotesPolicy, StageDate, Upsert, normalize_email,
};

/// Note written on a known contact whose reply was detected.
pub const AUTO_MARK_NOTE: &str = "Auto-marked from email response";
/// Note written on a contact created from an unknown sender's reply.
pub const AUTO_ADD_NOTE: &str = "Added automatically from email response";

/// A known, not-yet-answered contact who replied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseUpdate {
    pub email: String,
    pub name: String,
    pub company: String,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
}

/// An unknown sender who replied, as the contact to add.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseInsert {
    pub contact: Contact,
    pub subject: String,
    pub date: Option<DateTime<Utc>>,
}

/// Ledger changes implied by a batch of genuine replies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcilePlan {
    pub updates: Vec<ResponseUpdate>,
    pub inserts: Vec<ResponseInsert>,
    /// Replies from contacts already marked answered.
    pub already_answered: usize,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.inserts.is_empty()
    }
}

/// What applying a plan changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub marked: usize,
    pub inserted: usize,
    pub unchanged: usize,
}

/// Plan ledger changes for `genuine` replies. Several replies from one
/// sender count once (the first one seen).
pub fn reconcile(ledger: &Ledger, genuine: &[InboundMessage], today: NaiveDate) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut seen = HashSet::new();

    for message in genuine {
        let email = normalize_email(&message.sender);
        if email.is_empty() || !seen.insert(email.clone()) {
            continue;
        }

        match ledger.get(&email) {
            Some(contact) if contact.answered => plan.already_answered += 1,
            Some(contact) => plan.updates.push(ResponseUpdate {
                name: contact.display_name(),
                company: contact.company_name.clone(),
                subject: message.subject.clone(),
                date: message.date,
                email,
            }),
            None => plan.inserts.push(ResponseInsert {
                contact: responder_contact(&email, today),
                subject: message.subject.clone(),
                date: message.date,
            }),
        }
    }

    plan
}

/// Apply a plan. Running it again on the result changes nothing.
pub fn apply(ledger: &mut Ledger, plan: &ReconcilePlan) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for update in &plan.updates {
        let request = MarkRequest::responded(update.email.as_str())
            .with_notes(AUTO_MARK_NOTE, NotesPolicy::FillIfEmpty);
        match ledger.apply_mark(&request) {
            Ok(outcome) if outcome.changed => summary.marked += 1,
            Ok(_) => summary.unchanged += 1,
            Err(e) => warn!(email = %update.email, error = %e, "Cannot mark response"),
        }
    }

    for insert in &plan.inserts {
        let email = insert.contact.email.clone();
        if ledger.contains(&email) {
            match ledger.apply_mark(&MarkRequest::responded(email.as_str())) {
                Ok(outcome) if outcome.changed => summary.marked += 1,
                Ok(_) => summary.unchanged += 1,
                Err(e) => warn!(email = %email, error = %e, "Cannot mark response"),
            }
            continue;
        }
        if ledger.upsert(insert.contact.clone()) == Upsert::Inserted {
            info!(email = %email, "Added responder to ledger");
            summary.inserted += 1;
        }
    }

    summary
}

/// Contact for an unknown responder.
fn responder_contact(email: &str, today: NaiveDate) -> Contact {
    let (first_name, last_name) = names_from_local_part(email);
    Contact {
        email: email.to_string(),
        first_name,
        last_name,
        company_name: UNKNOWN.to_string(),
        first_contact_date: StageDate::On(today),
        answered: true,
        status: ContactStatus::Responded,
        notes: AUTO_ADD_NOTE.to_string(),
        ..Contact::default()
    }
}

/// `first.last@domain` → (`First`, `Last`); anything else → `Unknown`.
pub fn names_from_local_part(email: &str) -> (String, String) {
    let local = email.split('@').next().unwrap_or_default();
    let mut parts = local.split('.');
    match (parts.next(), parts.next()) {
        (Some(first), Some(last)) if !first.is_empty() && !last.is_empty() => {
            (capitalize(first), capitalize(last))
        }
        _ => (UNKNOWN.to_string(), UNKNOWN.to_string()),
    }
}

/// First character uppercased, the rest lowercased.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
