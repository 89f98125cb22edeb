//! Delimited-text reading and writing.

use std::path::{Path, PathBuf};

use csv::StringRecord;

use crate::error::LedgerError;

/// Separator candidates, in tie-break order.
const CANDIDATES: [u8; 3] = [b',', b';', b'\t'];

/// Separator used when sniffing finds nothing and for freshly written ledgers.
pub const DEFAULT_DELIMITER: u8 = b';';

/// Lines inspected when sniffing the separator.
const SNIFF_LINES: usize = 10;

/// A parsed delimited file: header row, data rows, detected separator.
#[derive(Debug, Clone)]
pub struct Table {
    pub path: PathBuf,
    pub delimiter: u8,
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

/// Detect the field separator by checking consistency across the first lines.
///
/// For each candidate, count fields per line. The candidate whose field count
/// is >1 on the header line and stays consistent across the sample wins; more
/// columns break ties.
pub fn sniff_delimiter(content: &str) -> u8 {
    let sample: Vec<&str> = content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    if sample.is_empty() {
        return DEFAULT_DELIMITER;
    }

    let mut best = DEFAULT_DELIMITER;
    let mut best_score = 0u64;

    for delim in CANDIDATES {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts[0];
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read a file as UTF-8, falling back to Windows-1252 (Excel exports).
pub fn read_file_as_utf8(path: &Path) -> Result<String, LedgerError> {
    let bytes = std::fs::read(path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.trim_start_matches('\u{feff}').to_string()),
        Err(e) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(e.as_bytes());
            Ok(decoded.into_owned())
        }
    }
}

/// Read and parse a delimited file with a mandatory header row.
pub fn read_table(path: &Path) -> Result<Table, LedgerError> {
    let content = read_file_as_utf8(path)?;
    parse_table(path, &content)
}

pub fn parse_table(path: &Path, content: &str) -> Result<Table, LedgerError> {
    let delimiter = sniff_delimiter(content);
    let csv_err = |source| LedgerError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = reader.headers().map_err(csv_err)?.clone();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(LedgerError::MissingHeader(path.to_path_buf()));
    }

    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(csv_err)?;

    Ok(Table {
        path: path.to_path_buf(),
        delimiter,
        headers,
        rows,
    })
}

/// Write rows to `path` through a sibling temp file and a rename, so a crash
/// mid-write leaves the previous file intact.
pub fn write_rows<I>(
    path: &Path,
    delimiter: u8,
    headers: &[String],
    rows: I,
) -> Result<(), LedgerError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let tmp = temp_path(path);
    let csv_err = |source| LedgerError::Csv {
        path: tmp.clone(),
        source,
    };

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(&tmp)
        .map_err(csv_err)?;
    writer.write_record(headers).map_err(csv_err)?;
    for row in rows {
        writer.write_record(&row).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| LedgerError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(writer);

    std::fs::rename(&tmp, path).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ledger.csv".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Collect `*.csv` files under `dir`, recursively, in sorted order.
pub fn collect_csv_files(dir: &Path) -> Result<Vec<PathBuf>, LedgerError> {
    let io_err = |source| LedgerError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"))
            {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}
