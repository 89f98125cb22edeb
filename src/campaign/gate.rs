//! Stage eligibility.
//!
//! A pure decision over one contact. The checks run in a fixed order and the
//! first one that fails names the skip reason:
//!
//! 1. already answered
//! 2. terminal status
//! 3. this stage already sent (never resend)
//! 4. prior stage date absent or unparseable
//! 5. fewer whole days than the minimum delay since the prior stage

use chrono::NaiveDate;
use serde::Serialize;

use super::stage::Stage;
use crate::ledger::Contact;

/// Why a contact is not sent this stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyAnswered,
    TerminalStatus,
    AlreadySent,
    MissingPriorStage,
    TooSoon { elapsed: i64, required: i64 },
}

impl SkipReason {
    /// Stable label, used to group skip counts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyAnswered => "already_answered",
            Self::TerminalStatus => "terminal_status",
            Self::AlreadySent => "already_sent",
            Self::MissingPriorStage => "missing_prior_stage",
            Self::TooSoon { .. } => "too_soon",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooSoon { elapsed, required } => {
                write!(f, "too soon ({elapsed}/{required} days)")
            }
            other => f.write_str(&other.label().replace('_', " ")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Send,
    Skip(SkipReason),
}

/// Decide whether `contact` gets `stage` today.
pub fn gate(contact: &Contact, stage: Stage, today: NaiveDate, min_delay_days: u32) -> GateDecision {
    if contact.answered {
        return GateDecision::Skip(SkipReason::AlreadyAnswered);
    }
    if contact.status.is_terminal() {
        return GateDecision::Skip(SkipReason::TerminalStatus);
    }
    if stage.date(contact).is_set() {
        return GateDecision::Skip(SkipReason::AlreadySent);
    }

    let Some(prior) = stage.prior() else {
        return GateDecision::Send;
    };
    let Some(prior_date) = prior.date(contact).date() else {
        return GateDecision::Skip(SkipReason::MissingPriorStage);
    };

    let elapsed = (today - prior_date).num_days();
    let required = i64::from(min_delay_days);
    if elapsed < required {
        return GateDecision::Skip(SkipReason::TooSoon { elapsed, required });
    }
    GateDecision::Send
}
