//! Campaign stages and their ledger columns.

use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ledger::{Contact, ContactStatus, StageDate};

/// One message of the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initial,
    Nudge1,
    Nudge2,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Initial, Stage::Nudge1, Stage::Nudge2];

    /// The stage whose date must be set before this one may be sent.
    pub fn prior(self) -> Option<Stage> {
        match self {
            Self::Initial => None,
            Self::Nudge1 => Some(Self::Initial),
            Self::Nudge2 => Some(Self::Nudge1),
        }
    }

    /// This stage's date column on a contact.
    pub fn date(self, contact: &Contact) -> &StageDate {
        match self {
            Self::Initial => &contact.first_contact_date,
            Self::Nudge1 => &contact.nudge1_date,
            Self::Nudge2 => &contact.nudge2_date,
        }
    }

    fn date_mut(self, contact: &mut Contact) -> &mut StageDate {
        match self {
            Self::Initial => &mut contact.first_contact_date,
            Self::Nudge1 => &mut contact.nudge1_date,
            Self::Nudge2 => &mut contact.nudge2_date,
        }
    }

    /// Status a contact moves to once this stage is sent.
    pub fn sent_status(self) -> ContactStatus {
        match self {
            Self::Initial => ContactStatus::Contacted,
            Self::Nudge1 => ContactStatus::Nudge1Sent,
            Self::Nudge2 => ContactStatus::Nudge2Sent,
        }
    }

    /// Template file for this stage, relative to the template directory.
    pub fn template_file(self) -> &'static str {
        match self {
            Self::Initial => "template.html",
            Self::Nudge1 => "template_nudge1.html",
            Self::Nudge2 => "template_nudge2.html",
        }
    }

    /// Record a successful send: stamp the stage date and advance the status.
    /// The status never moves backwards.
    pub fn stamp(self, contact: &mut Contact, today: NaiveDate) {
        *self.date_mut(contact) = StageDate::On(today);
        let target = self.sent_status();
        if contact.status.can_advance_to(target) {
            contact.status = target;
        }
    }

    /// Parse a follow-up stage name; the first send is not a follow-up.
    pub fn parse_nudge(raw: &str) -> Result<Stage, String> {
        match raw.parse::<Stage>()? {
            Stage::Initial => Err(format!("'{}' is not a follow-up (expected nudge1 or nudge2)", raw.trim())),
            stage => Ok(stage),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Nudge1 => "nudge1",
            Self::Nudge2 => "nudge2",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "initial" | "first" => Ok(Self::Initial),
            "nudge1" | "1" => Ok(Self::Nudge1),
            "nudge2" | "2" => Ok(Self::Nudge2),
            other => Err(format!("unknown stage '{other}' (expected initial, nudge1 or nudge2)")),
        }
    }
}
