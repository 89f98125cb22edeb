//! Header alias resolution.
//!
//! Source files name the same column in different ways (`email`/`Email`,
//! `first_name`/`firstName`/`First Name`, ...). Each canonical field has an
//! ordered alias list; a file's header row is resolved once into a
//! [`ColumnMap`] and every row is read through that fixed mapping.

use csv::StringRecord;

/// Canonical ledger fields, in ledger column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Email,
    FirstName,
    LastName,
    CompanyName,
    FirstContactDate,
    Nudge1Date,
    Nudge2Date,
    Answered,
    Status,
    Notes,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::Email,
        Field::FirstName,
        Field::LastName,
        Field::CompanyName,
        Field::FirstContactDate,
        Field::Nudge1Date,
        Field::Nudge2Date,
        Field::Answered,
        Field::Status,
        Field::Notes,
    ];

    /// Column name written to the ledger.
    pub fn column(self) -> &'static str {
        self.aliases()[0]
    }

    /// Accepted header names, highest priority first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Field::Email => &["email", "Email", "EMAIL", "e-mail", "E-mail"],
            Field::FirstName => &["first_name", "firstName", "First Name", "cleanFirstName"],
            Field::LastName => &["last_name", "lastName", "Last Name"],
            Field::CompanyName => &["company_name", "companyName", "Company Name"],
            Field::FirstContactDate => &["premier_envoi_date", "first_contact_date"],
            Field::Nudge1Date => &["nudge1_date"],
            Field::Nudge2Date => &["nudge2_date"],
            Field::Answered => &["answered"],
            Field::Status => &["status"],
            Field::Notes => &["notes"],
        }
    }
}

/// Full-name columns used when the split name columns are empty.
const FULL_NAME_ALIASES: &[&str] = &["fullName", "Full Name"];

/// Legacy "already sent" flag written by the first-send script.
pub const LEGACY_SENT_COLUMN: &str = "sent";

/// A header row resolved against the alias lists.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    /// Per canonical field (indexed by `Field as usize`), the matching column
    /// indices in alias priority order.
    fields: Vec<Vec<usize>>,
    full_name: Vec<usize>,
    legacy_sent: Option<usize>,
    /// Columns that matched no alias, with their header name.
    extra: Vec<(usize, String)>,
}

impl ColumnMap {
    pub fn resolve(headers: &StringRecord) -> Self {
        let names: Vec<&str> = headers.iter().map(str::trim).collect();
        let lookup = |aliases: &[&str]| -> Vec<usize> {
            aliases
                .iter()
                .filter_map(|alias| names.iter().position(|name| name == alias))
                .collect()
        };

        let fields: Vec<Vec<usize>> = Field::ALL.iter().map(|f| lookup(f.aliases())).collect();
        let full_name = lookup(FULL_NAME_ALIASES);
        let legacy_sent = names.iter().position(|name| *name == LEGACY_SENT_COLUMN);

        let mut claimed: Vec<usize> = fields.iter().flatten().copied().collect();
        claimed.extend(&full_name);
        claimed.extend(legacy_sent);

        let extra = names
            .iter()
            .enumerate()
            .filter(|(idx, name)| !name.is_empty() && !claimed.contains(idx))
            .map(|(idx, name)| (idx, name.to_string()))
            .collect();

        Self {
            fields,
            full_name,
            legacy_sent,
            extra,
        }
    }

    pub fn has(&self, field: Field) -> bool {
        !self.columns(field).is_empty()
    }

    fn columns(&self, field: Field) -> &[usize] {
        &self.fields[field as usize]
    }

    /// First non-empty value among the field's resolved columns.
    pub fn get<'r>(&self, record: &'r StringRecord, field: Field) -> &'r str {
        first_non_empty(record, self.columns(field))
    }

    /// First and last name, falling back to splitting a full-name column.
    pub fn names(&self, record: &StringRecord) -> (String, String) {
        let first = self.get(record, Field::FirstName);
        let last = self.get(record, Field::LastName);
        if !first.is_empty() && !last.is_empty() {
            return (first.to_string(), last.to_string());
        }

        let full = first_non_empty(record, &self.full_name);
        let mut tokens = full.split_whitespace();
        let full_first = tokens.next().unwrap_or_default();
        let full_last = tokens.collect::<Vec<_>>().join(" ");

        let first = if first.is_empty() { full_first } else { first };
        let last = if last.is_empty() { full_last.as_str() } else { last };
        (first.to_string(), last.to_string())
    }

    /// Value of the legacy `sent` column, if the file has one.
    pub fn legacy_sent<'r>(&self, record: &'r StringRecord) -> Option<&'r str> {
        self.legacy_sent
            .and_then(|idx| record.get(idx))
            .map(str::trim)
    }

    /// Non-canonical columns, in file order.
    pub fn extra_columns(&self) -> impl Iterator<Item = &str> {
        self.extra.iter().map(|(_, name)| name.as_str())
    }

    pub fn extra_values<'r>(
        &'r self,
        record: &'r StringRecord,
    ) -> impl Iterator<Item = (&'r str, &'r str)> {
        self.extra.iter().map(move |(idx, name)| {
            (name.as_str(), record.get(*idx).map(str::trim).unwrap_or_default())
        })
    }
}

fn first_non_empty<'r>(record: &'r StringRecord, columns: &[usize]) -> &'r str {
    columns
        .iter()
        .filter_map(|idx| record.get(*idx))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn resolves_apollo_style_headers() {
        let headers = record(&["Email", "First Name", "Last Name", "Company Name", "Title"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["Bob@Agence.fr", "Bob", "Durand", "Agence", "CEO"]);

        assert_eq!(map.get(&row, Field::Email), "Bob@Agence.fr");
        assert_eq!(map.get(&row, Field::CompanyName), "Agence");
        assert_eq!(map.names(&row), ("Bob".to_string(), "Durand".to_string()));
        assert_eq!(map.extra_columns().collect::<Vec<_>>(), vec!["Title"]);
    }

    #[test]
    fn earlier_alias_wins_when_both_present() {
        let headers = record(&["firstName", "first_name", "email"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["Camel", "Snake", "a@x.com"]);
        assert_eq!(map.get(&row, Field::FirstName), "Snake");
    }

    #[test]
    fn falls_through_to_next_alias_when_empty() {
        let headers = record(&["first_name", "cleanFirstName", "email"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["", "Claire", "c@x.com"]);
        assert_eq!(map.get(&row, Field::FirstName), "Claire");
    }

    #[test]
    fn full_name_fills_missing_split_names() {
        let headers = record(&["email", "fullName"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["j@x.com", "Jean Pierre Martin"]);
        assert_eq!(
            map.names(&row),
            ("Jean".to_string(), "Pierre Martin".to_string())
        );
    }

    #[test]
    fn missing_field_reads_empty() {
        let headers = record(&["email"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["a@x.com"]);
        assert!(!map.has(Field::Notes));
        assert_eq!(map.get(&row, Field::Notes), "");
    }

    #[test]
    fn legacy_sent_column_is_detected() {
        let headers = record(&["email", "sent"]);
        let map = ColumnMap::resolve(&headers);
        let row = record(&["a@x.com", "yes"]);
        assert_eq!(map.legacy_sent(&row), Some("yes"));
        assert_eq!(map.extra_columns().count(), 0);
    }
}
