//! Exclusion lists for the first send.

use std::collections::HashSet;
use std::path::Path;

use tracing::{info, warn};

use crate::error::LedgerError;
use crate::ledger::columns::{ColumnMap, Field};
use crate::ledger::contact::is_valid_email;
use crate::ledger::csv_io;
use crate::ledger::normalize_email;

/// Emails listed in a CSV file, or in every CSV under a directory.
///
/// Inside a directory, files without an email column are skipped with a
/// warning; a single file without one is an error.
pub fn load_exclusion_set(path: &Path) -> Result<HashSet<String>, LedgerError> {
    let mut excluded = HashSet::new();

    if path.is_dir() {
        for file in csv_io::collect_csv_files(path)? {
            if let Err(e) = add_emails_from(&file, &mut excluded) {
                warn!(file = %file.display(), error = %e, "Skipping exclusion file");
            }
        }
    } else {
        add_emails_from(path, &mut excluded)?;
    }

    info!(count = excluded.len(), source = %path.display(), "Loaded exclusion list");
    Ok(excluded)
}

fn add_emails_from(path: &Path, excluded: &mut HashSet<String>) -> Result<(), LedgerError> {
    let table = csv_io::read_table(path)?;
    let map = ColumnMap::resolve(&table.headers);
    if !map.has(Field::Email) {
        return Err(LedgerError::MissingEmailColumn(path.to_path_buf()));
    }
    excluded.extend(
        table
            .rows
            .iter()
            .map(|row| normalize_email(map.get(row, Field::Email)))
            .filter(|email| is_valid_email(email)),
    );
    Ok(())
}
