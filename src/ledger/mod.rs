//! Contact ledger: the durable CSV contact-state store.
//!
//! The ledger holds at most one [`Contact`] per normalized email, kept sorted
//! by email so every rewrite is deterministic. It is loaded from and written
//! back to a single delimited file; the separator detected on load is reused
//! on save.

pub mod columns;
pub mod contact;
pub mod csv_io;
pub mod mark;
pub mod merge;

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use csv::StringRecord;
use tracing::{debug, warn};

use crate::error::LedgerError;

pub use columns::{ColumnMap, Field};
pub use contact::{Contact, ContactStatus, StageDate, normalize_email};
pub use csv_io::Table;
pub use mark::{MarkOutcome, MarkRequest, NotesPolicy};
pub use merge::{MergeReport, MergeStats};

/// Result of folding a contact into the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The email was new.
    Inserted,
    /// The email existed and at least one empty field was filled.
    Filled,
    /// The email existed and nothing changed.
    Unchanged,
}

/// The contact ledger.
#[derive(Debug, Clone)]
pub struct Ledger {
    contacts: BTreeMap<String, Contact>,
    delimiter: u8,
    extra_columns: Vec<String>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            contacts: BTreeMap::new(),
            delimiter: csv_io::DEFAULT_DELIMITER,
            extra_columns: Vec::new(),
        }
    }

    /// Load a ledger file. `today` dates contacts migrated from the legacy
    /// `sent` flag.
    pub fn load(path: &Path, today: NaiveDate) -> Result<Self, LedgerError> {
        let table = csv_io::read_table(path)?;
        Self::from_table(&table, today)
    }

    pub fn from_table(table: &Table, today: NaiveDate) -> Result<Self, LedgerError> {
        let map = ColumnMap::resolve(&table.headers);
        if !map.has(Field::Email) {
            return Err(LedgerError::MissingEmailColumn(table.path.clone()));
        }

        let mut ledger = Self {
            contacts: BTreeMap::new(),
            delimiter: table.delimiter,
            extra_columns: map.extra_columns().map(str::to_string).collect(),
        };

        for (line, record) in table.rows.iter().enumerate() {
            let Some(contact) = contact_from_record(&map, record, today) else {
                debug!(line = line + 2, path = %table.path.display(), "Skipping row without email");
                continue;
            };
            if ledger.upsert(contact) != Upsert::Inserted {
                debug!(line = line + 2, "Duplicate ledger row folded into existing contact");
            }
        }

        Ok(ledger)
    }

    /// Rewrite the whole ledger file.
    pub fn save(&self, path: &Path) -> Result<(), LedgerError> {
        let mut headers: Vec<String> = Field::ALL.iter().map(|f| f.column().to_string()).collect();
        headers.extend(self.extra_columns.iter().cloned());

        let rows = self.contacts.values().map(|c| {
            let mut row = vec![
                c.email.clone(),
                c.first_name.clone(),
                c.last_name.clone(),
                c.company_name.clone(),
                c.first_contact_date.to_string(),
                c.nudge1_date.to_string(),
                c.nudge2_date.to_string(),
                contact::format_flag(c.answered).to_string(),
                c.status.to_string(),
                c.notes.clone(),
            ];
            row.extend(
                self.extra_columns
                    .iter()
                    .map(|col| c.extra.get(col).cloned().unwrap_or_default()),
            );
            row
        });

        csv_io::write_rows(path, self.delimiter, &headers, rows)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn set_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    pub fn get(&self, email: &str) -> Option<&Contact> {
        self.contacts.get(&normalize_email(email))
    }

    pub fn get_mut(&mut self, email: &str) -> Option<&mut Contact> {
        self.contacts.get_mut(&normalize_email(email))
    }

    pub fn contains(&self, email: &str) -> bool {
        self.contacts.contains_key(&normalize_email(email))
    }

    /// Contacts in email order.
    pub fn iter(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.values()
    }

    /// Insert a new contact, or fill the empty fields of the existing one.
    pub fn upsert(&mut self, mut contact: Contact) -> Upsert {
        contact.email = normalize_email(&contact.email);
        match self.contacts.get_mut(&contact.email) {
            Some(existing) => {
                if existing.fill_empty_from(&contact) {
                    Upsert::Filled
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                for key in contact.extra.keys() {
                    if !self.extra_columns.contains(key) {
                        self.extra_columns.push(key.clone());
                    }
                }
                self.contacts.insert(contact.email.clone(), contact);
                Upsert::Inserted
            }
        }
    }
}

/// Build a contact from one row. `None` when the row has no usable email.
///
/// A truthy legacy `sent` flag (or a boolean-like `status`) on a contact with
/// no first-contact date is migrated to a first-contact date of `today`.
pub fn contact_from_record(
    map: &ColumnMap,
    record: &StringRecord,
    today: NaiveDate,
) -> Option<Contact> {
    let email = normalize_email(map.get(record, Field::Email));
    if !contact::is_valid_email(&email) {
        return None;
    }

    let (first_name, last_name) = map.names(record);
    let raw_status = map.get(record, Field::Status);
    let mut legacy_sent = map.legacy_sent(record).is_some_and(contact::parse_flag);

    let status = if raw_status.is_empty() {
        ContactStatus::default()
    } else {
        match raw_status.parse::<ContactStatus>() {
            Ok(status) => status,
            Err(_) if contact::parse_flag(raw_status) => {
                legacy_sent = true;
                ContactStatus::default()
            }
            Err(e) => {
                warn!(email = %email, "{e}; treating as contacted");
                ContactStatus::default()
            }
        }
    };

    let mut first_contact_date = StageDate::parse(map.get(record, Field::FirstContactDate));
    if legacy_sent && !first_contact_date.is_set() {
        first_contact_date = StageDate::On(today);
    }

    Some(Contact {
        first_name,
        last_name,
        company_name: map.get(record, Field::CompanyName).to_string(),
        first_contact_date,
        nudge1_date: StageDate::parse(map.get(record, Field::Nudge1Date)),
        nudge2_date: StageDate::parse(map.get(record, Field::Nudge2Date)),
        answered: contact::parse_flag(map.get(record, Field::Answered)),
        status,
        notes: map.get(record, Field::Notes).to_string(),
        extra: map
            .extra_values(record)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        email,
    })
}

/// The first row of `table` with a usable email, as a contact.
pub fn first_valid_contact(table: &Table, today: NaiveDate) -> Result<Contact, LedgerError> {
    let map = ColumnMap::resolve(&table.headers);
    if !map.has(Field::Email) {
        return Err(LedgerError::MissingEmailColumn(table.path.clone()));
    }
    table
        .rows
        .iter()
        .find_map(|record| contact_from_record(&map, record, today))
        .ok_or_else(|| LedgerError::NoValidRow(table.path.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, contact::DATE_FORMAT).unwrap()
    }

    fn ledger_from(content: &str) -> Ledger {
        let table = csv_io::parse_table(Path::new("ledger.csv"), content).unwrap();
        Ledger::from_table(&table, day("2024-06-01")).unwrap()
    }

    #[test]
    fn load_reads_canonical_columns() {
        let ledger = ledger_from(
            "email;first_name;last_name;company_name;premier_envoi_date;nudge1_date;nudge2_date;answered;status;notes\n\
             a@x.com;Alice;Martin;Agence A;2024-01-01;2024-01-05;;no;nudge1_sent;\n",
        );
        let c = ledger.get("A@X.com").unwrap();
        assert_eq!(c.first_name, "Alice");
        assert_eq!(c.first_contact_date.date(), Some(day("2024-01-01")));
        assert_eq!(c.nudge1_date.date(), Some(day("2024-01-05")));
        assert!(!c.nudge2_date.is_set());
        assert_eq!(c.status, ContactStatus::Nudge1Sent);
        assert!(!c.answered);
    }

    #[test]
    fn load_requires_email_column() {
        let table = csv_io::parse_table(Path::new("x.csv"), "name;company\nA;B\n").unwrap();
        assert!(matches!(
            Ledger::from_table(&table, day("2024-01-01")),
            Err(LedgerError::MissingEmailColumn(_))
        ));
    }

    #[test]
    fn duplicate_rows_collapse_to_one_contact() {
        let ledger = ledger_from("email,first_name,last_name\nA@x.com,Alice,\na@x.com,,Martin\n");
        assert_eq!(ledger.len(), 1);
        let c = ledger.get("a@x.com").unwrap();
        assert_eq!(c.first_name, "Alice");
        assert_eq!(c.last_name, "Martin");
    }

    #[test]
    fn rows_without_email_are_skipped() {
        let ledger = ledger_from("email,first_name\n,Nobody\nnot-an-email,Bad\nb@x.com,Bob\n");
        let emails: Vec<&str> = ledger.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["b@x.com"]);
    }

    #[test]
    fn first_valid_contact_skips_rows_without_email() {
        let table = csv_io::parse_table(
            Path::new("list.csv"),
            "email;firstName;companyName\n;Nobody;X\nchloe@agence.fr;Chloe;Agence\nz@x.com;Zed;Y\n",
        )
        .unwrap();
        let c = first_valid_contact(&table, day("2024-06-01")).unwrap();
        assert_eq!(c.email, "chloe@agence.fr");
        assert_eq!(c.first_name, "Chloe");
        assert_eq!(c.company_name, "Agence");

        let empty = csv_io::parse_table(Path::new("empty.csv"), "email;name\n;x\n").unwrap();
        assert!(matches!(
            first_valid_contact(&empty, day("2024-06-01")),
            Err(LedgerError::NoValidRow(_))
        ));
    }

    #[test]
    fn legacy_sent_flag_migrates_to_first_contact_date() {
        let ledger = ledger_from("email,sent\na@x.com,yes\nb@x.com,\n");
        assert_eq!(
            ledger.get("a@x.com").unwrap().first_contact_date.date(),
            Some(day("2024-06-01"))
        );
        assert!(!ledger.get("b@x.com").unwrap().first_contact_date.is_set());
    }

    #[test]
    fn boolean_status_migrates_like_sent_flag() {
        let ledger = ledger_from("email,status\na@x.com,YES\n");
        let c = ledger.get("a@x.com").unwrap();
        assert_eq!(c.status, ContactStatus::Contacted);
        assert!(c.first_contact_date.is_set());
    }

    #[test]
    fn save_round_trips_and_preserves_extra_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(
            &path,
            "email,first_name,linkedin,answered\nb@x.com,Bob,in/bob,yes\na@x.com,Alice,,no\n",
        )
        .unwrap();

        let ledger = Ledger::load(&path, day("2024-06-01")).unwrap();
        ledger.save(&path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        let mut lines = written.lines();
        assert_eq!(
            lines.next().unwrap(),
            "email,first_name,last_name,company_name,premier_envoi_date,nudge1_date,nudge2_date,answered,status,notes,linkedin"
        );
        assert_eq!(lines.next().unwrap(), "a@x.com,Alice,,,,,,no,contacted,,");
        assert_eq!(lines.next().unwrap(), "b@x.com,Bob,,,,,,yes,contacted,,in/bob");

        let reloaded = Ledger::load(&path, day("2024-06-01")).unwrap();
        assert_eq!(reloaded.get("b@x.com"), ledger.get("b@x.com"));
    }

    #[test]
    fn unparsed_dates_survive_a_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        std::fs::write(&path, "email;nudge1_date\na@x.com;le 5 mars\n").unwrap();
        Ledger::load(&path, day("2024-06-01")).unwrap().save(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("le 5 mars"));
    }
}
