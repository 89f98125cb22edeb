//! Folding heterogeneous source files into the ledger.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::columns::{ColumnMap, Field};
use super::contact::Contact;
use super::csv_io::{self, Table};
use super::{Ledger, Upsert, contact_from_record};
use crate::error::LedgerError;

/// Counts for one merged source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Emails that were not in the ledger yet.
    pub new: usize,
    /// Rows whose email was already known (in the ledger or earlier in the run).
    pub existing: usize,
    /// Existing contacts that gained at least one field.
    pub filled: usize,
    /// Rows dropped for a missing or malformed email.
    pub skipped_rows: usize,
}

impl MergeStats {
    fn add(&mut self, other: MergeStats) {
        self.new += other.new;
        self.existing += other.existing;
        self.filled += other.filled;
        self.skipped_rows += other.skipped_rows;
    }
}

/// Outcome of a directory merge.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    pub files: Vec<(PathBuf, MergeStats)>,
    pub failed: Vec<(PathBuf, String)>,
    pub total: MergeStats,
}

/// Merge one parsed source into the ledger.
///
/// New emails take only their identity (names, company, notes) from the
/// source and start in the default state: `contacted`, first contact `today`,
/// no nudge dates, not answered. Whatever state columns the source carries
/// are ignored for them. Known emails only gain empty fields and never change
/// `answered` or `status`. Extra source columns are not carried over.
pub fn merge_table(
    ledger: &mut Ledger,
    table: &Table,
    today: NaiveDate,
) -> Result<MergeStats, LedgerError> {
    let map = ColumnMap::resolve(&table.headers);
    if !map.has(Field::Email) {
        return Err(LedgerError::MissingEmailColumn(table.path.clone()));
    }

    let mut stats = MergeStats::default();
    for record in &table.rows {
        let Some(mut contact) = contact_from_record(&map, record, today) else {
            stats.skipped_rows += 1;
            continue;
        };
        contact.extra.clear();
        if !ledger.contains(&contact.email) {
            contact = fresh_contact(contact, today);
        }

        match ledger.upsert(contact) {
            Upsert::Inserted => stats.new += 1,
            Upsert::Filled => {
                stats.existing += 1;
                stats.filled += 1;
            }
            Upsert::Unchanged => stats.existing += 1,
        }
    }

    debug!(
        path = %table.path.display(),
        new = stats.new,
        existing = stats.existing,
        skipped = stats.skipped_rows,
        "Merged source"
    );
    Ok(stats)
}

/// Default-state contact keeping the identity fields of `source`.
fn fresh_contact(source: Contact, today: NaiveDate) -> Contact {
    Contact {
        first_name: source.first_name,
        last_name: source.last_name,
        company_name: source.company_name,
        notes: source.notes,
        ..Contact::new(&source.email, today)
    }
}

/// Merge every listed file; a file that fails to parse is logged and skipped.
pub fn merge_files(ledger: &mut Ledger, files: &[PathBuf], today: NaiveDate) -> MergeReport {
    let mut report = MergeReport::default();

    for path in files {
        let merged = csv_io::read_table(path).and_then(|table| merge_table(ledger, &table, today));
        match merged {
            Ok(stats) => {
                info!(
                    file = %path.display(),
                    new = stats.new,
                    existing = stats.existing,
                    "Processed source file"
                );
                report.total.add(stats);
                report.files.push((path.clone(), stats));
            }
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping source file");
                report.failed.push((path.clone(), e.to_string()));
            }
        }
    }

    report
}

/// Consolidate every `*.csv` under `source_dir` into the master ledger and
/// write the result (`;`-separated) to `output`.
///
/// A missing master starts from an empty ledger. The output file itself is
/// never read back as a source.
pub fn merge_directory(
    master: &Path,
    source_dir: &Path,
    output: &Path,
    today: NaiveDate,
) -> Result<(Ledger, MergeReport), LedgerError> {
    let mut ledger = if master.exists() {
        Ledger::load(master, today)?
    } else {
        warn!(path = %master.display(), "Master ledger not found, starting empty");
        Ledger::new()
    };
    let before = ledger.len();

    let files: Vec<PathBuf> = csv_io::collect_csv_files(source_dir)?
        .into_iter()
        .filter(|f| !same_file(f, master) && !same_file(f, output))
        .collect();
    info!(count = files.len(), dir = %source_dir.display(), "Found source files");

    let report = merge_files(&mut ledger, &files, today);

    ledger.set_delimiter(b';');
    ledger.save(output)?;
    info!(
        before,
        after = ledger.len(),
        new = report.total.new,
        existing = report.total.existing,
        failed = report.failed.len(),
        output = %output.display(),
        "Ledger consolidated"
    );
    Ok((ledger, report))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
