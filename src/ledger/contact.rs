//! Contact record and its campaign state.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::LedgerError;

/// Date format used in every ledger date column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Placeholder written when a field cannot be inferred.
pub const UNKNOWN: &str = "Unknown";

/// Normalize an email address into the ledger key (trimmed, lowercased).
pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Whether a normalized email is usable as a ledger key.
pub fn is_valid_email(email: &str) -> bool {
    !email.is_empty() && email.contains('@')
}

/// Parse the loose boolean representations found in source files.
pub fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "yes" | "y" | "true" | "1" | "oui"
    )
}

/// Canonical boolean representation written to the ledger.
pub fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Campaign status of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactStatus {
    /// First message sent.
    #[default]
    Contacted,
    /// First nudge sent.
    Nudge1Sent,
    /// Second nudge sent.
    Nudge2Sent,
    /// Prospect replied.
    Responded,
    /// Prospect declined.
    NotInterested,
    /// Prospect replied and was qualified.
    Qualified,
}

impl ContactStatus {
    /// Position in the automated sequence, `None` for reply outcomes.
    fn sequence_rank(self) -> Option<u8> {
        match self {
            Self::Contacted => Some(0),
            Self::Nudge1Sent => Some(1),
            Self::Nudge2Sent => Some(2),
            Self::Responded | Self::NotInterested | Self::Qualified => None,
        }
    }

    /// Whether an automated send may move a contact from `self` to `target`.
    ///
    /// The sequence only moves forward; any non-terminal state may jump to a
    /// reply outcome; terminal states never move.
    pub fn can_advance_to(self, target: ContactStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match (self.sequence_rank(), target.sequence_rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(_), None) => true,
            _ => false,
        }
    }

    /// Terminal with respect to further automated sends.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Responded | Self::NotInterested | Self::Qualified)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contacted => "contacted",
            Self::Nudge1Sent => "nudge1_sent",
            Self::Nudge2Sent => "nudge2_sent",
            Self::Responded => "responded",
            Self::NotInterested => "not_interested",
            Self::Qualified => "qualified",
        }
    }
}

impl std::fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "contacted" => Ok(Self::Contacted),
            "nudge1_sent" => Ok(Self::Nudge1Sent),
            "nudge2_sent" => Ok(Self::Nudge2Sent),
            "responded" => Ok(Self::Responded),
            "not_interested" => Ok(Self::NotInterested),
            "qualified" => Ok(Self::Qualified),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// A stage date column.
///
/// Non-empty values that are not ISO dates are kept verbatim so that a
/// rewrite never loses them, and so they still count as "already sent".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageDate {
    #[default]
    Unset,
    On(NaiveDate),
    Unparsed(String),
}

impl StageDate {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return Self::Unset;
        }
        match NaiveDate::parse_from_str(raw, DATE_FORMAT) {
            Ok(date) => Self::On(date),
            Err(_) => Self::Unparsed(raw.to_string()),
        }
    }

    pub fn is_set(&self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// The parsed date, if the column holds a valid one.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Self::On(date) => Some(*date),
            _ => None,
        }
    }
}

impl From<NaiveDate> for StageDate {
    fn from(date: NaiveDate) -> Self {
        Self::On(date)
    }
}

impl Serialize for StageDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::fmt::Display for StageDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unset => Ok(()),
            Self::On(date) => write!(f, "{}", date.format(DATE_FORMAT)),
            Self::Unparsed(raw) => f.write_str(raw),
        }
    }
}

/// One prospect in the ledger, keyed by normalized email.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Contact {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub company_name: String,
    pub first_contact_date: StageDate,
    pub nudge1_date: StageDate,
    pub nudge2_date: StageDate,
    pub answered: bool,
    pub status: ContactStatus,
    pub notes: String,
    /// Non-canonical ledger columns, preserved on rewrite.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Contact {
    /// A freshly imported contact: `contacted`, first contact dated `today`.
    pub fn new(email: &str, today: NaiveDate) -> Self {
        Self {
            email: normalize_email(email),
            first_contact_date: StageDate::On(today),
            ..Self::default()
        }
    }

    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// Copy every non-empty field of `other` into an empty field of `self`.
    ///
    /// Returns true if anything changed. `answered` and `status` are never
    /// touched: they always carry a value on an existing contact.
    pub fn fill_empty_from(&mut self, other: &Contact) -> bool {
        let mut changed = false;
        for (mine, theirs) in [
            (&mut self.first_name, &other.first_name),
            (&mut self.last_name, &other.last_name),
            (&mut self.company_name, &other.company_name),
            (&mut self.notes, &other.notes),
        ] {
            if mine.is_empty() && !theirs.is_empty() {
                mine.clone_from(theirs);
                changed = true;
            }
        }
        for (mine, theirs) in [
            (&mut self.first_contact_date, &other.first_contact_date),
            (&mut self.nudge1_date, &other.nudge1_date),
            (&mut self.nudge2_date, &other.nudge2_date),
        ] {
            if !mine.is_set() && theirs.is_set() {
                mine.clone_from(theirs);
                changed = true;
            }
        }
        for (key, value) in &other.extra {
            if value.is_empty() {
                continue;
            }
            let slot = self.extra.entry(key.clone()).or_default();
            if slot.is_empty() {
                slot.clone_from(value);
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn normalize_trims_and_lowercases() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn email_validity_requires_at() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email(""));
    }

    #[test]
    fn flags_accept_loose_truthy_values() {
        assert!(parse_flag("YES"));
        assert!(parse_flag(" true "));
        assert!(parse_flag("1"));
        assert!(!parse_flag("no"));
        assert!(!parse_flag(""));
        assert_eq!(format_flag(true), "yes");
        assert_eq!(format_flag(false), "no");
    }

    #[test]
    fn status_sequence_is_monotonic() {
        use ContactStatus::*;
        assert!(Contacted.can_advance_to(Nudge1Sent));
        assert!(Nudge1Sent.can_advance_to(Nudge2Sent));
        assert!(Contacted.can_advance_to(Nudge2Sent));
        assert!(!Nudge2Sent.can_advance_to(Nudge1Sent));
        assert!(!Nudge1Sent.can_advance_to(Contacted));
        assert!(!Contacted.can_advance_to(Contacted));
    }

    #[test]
    fn reply_outcomes_interrupt_and_are_terminal() {
        use ContactStatus::*;
        assert!(Nudge1Sent.can_advance_to(Responded));
        assert!(Contacted.can_advance_to(NotInterested));
        assert!(!Responded.can_advance_to(Nudge2Sent));
        assert!(!NotInterested.can_advance_to(Responded));
        assert!(Qualified.is_terminal());
        assert!(!Nudge2Sent.is_terminal());
    }

    #[test]
    fn status_parses_and_displays() {
        assert_eq!(
            "Not_Interested".parse::<ContactStatus>().unwrap(),
            ContactStatus::NotInterested
        );
        assert_eq!(ContactStatus::Nudge1Sent.to_string(), "nudge1_sent");
        assert!("yes".parse::<ContactStatus>().is_err());
    }

    #[test]
    fn status_serde_uses_snake_case() {
        let json = serde_json::to_string(&ContactStatus::NotInterested).unwrap();
        assert_eq!(json, "\"not_interested\"");
    }

    #[test]
    fn stage_date_keeps_unparsed_values() {
        assert_eq!(StageDate::parse(""), StageDate::Unset);
        assert_eq!(StageDate::parse("2024-01-05"), StageDate::On(day("2024-01-05")));
        let odd = StageDate::parse("05/01/2024");
        assert!(odd.is_set());
        assert_eq!(odd.date(), None);
        assert_eq!(odd.to_string(), "05/01/2024");
    }

    #[test]
    fn new_contact_has_default_state() {
        let c = Contact::new(" A@X.com", day("2024-03-01"));
        assert_eq!(c.email, "a@x.com");
        assert_eq!(c.status, ContactStatus::Contacted);
        assert!(!c.answered);
        assert_eq!(c.first_contact_date.date(), Some(day("2024-03-01")));
        assert!(!c.nudge1_date.is_set());
    }

    #[test]
    fn fill_empty_never_overwrites() {
        let mut existing = Contact::new("a@x.com", day("2024-01-01"));
        existing.first_name = "Alice".into();

        let mut incoming = Contact::new("a@x.com", day("2024-02-02"));
        incoming.first_name = String::new();
        incoming.last_name = "Martin".into();
        incoming.answered = true;
        incoming.status = ContactStatus::Responded;

        assert!(existing.fill_empty_from(&incoming));
        assert_eq!(existing.first_name, "Alice");
        assert_eq!(existing.last_name, "Martin");
        assert_eq!(existing.first_contact_date.date(), Some(day("2024-01-01")));
        assert!(!existing.answered);
        assert_eq!(existing.status, ContactStatus::Contacted);
    }

    #[test]
    fn fill_empty_reports_no_change() {
        let mut existing = Contact::new("a@x.com", day("2024-01-01"));
        existing.first_name = "Alice".into();
        let incoming = existing.clone();
        assert!(!existing.fill_empty_from(&incoming));
    }
}
