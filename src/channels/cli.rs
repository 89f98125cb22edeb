//! Terminal marking session: a stdin REPL for recording replies by hand.

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::LedgerError;
use crate::ledger::{ContactStatus, Ledger, MarkRequest, NotesPolicy};

const QUIT_WORDS: [&str; 3] = ["quit", "q", "exit"];

/// Prompt for email, status and notes until `quit` or end of input. The
/// ledger is saved to `path` after every mark. Returns the number of marks.
pub async fn run_marking_session<R, W>(
    ledger: &mut Ledger,
    path: &Path,
    input: R,
    out: &mut W,
) -> Result<usize, LedgerError>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let mut marked = 0;

    let _ = writeln!(out, "Interactive marking. Type 'quit' to stop.");
    loop {
        let _ = write!(out, "email> ");
        let _ = out.flush();
        let Some(email) = next_line(&mut lines, path).await? else {
            break;
        };
        if email.is_empty() {
            continue;
        }
        if QUIT_WORDS.contains(&email.to_lowercase().as_str()) {
            break;
        }
        let Some(contact) = ledger.get(&email) else {
            let _ = writeln!(out, "Not found: {email}");
            continue;
        };
        let _ = writeln!(
            out,
            "{} ({}) status={} answered={}",
            contact.display_name(),
            contact.company_name,
            contact.status,
            crate::ledger::contact::format_flag(contact.answered)
        );

        let _ = write!(out, "status [responded]> ");
        let _ = out.flush();
        let Some(raw_status) = next_line(&mut lines, path).await? else {
            break;
        };
        let status = if raw_status.is_empty() {
            ContactStatus::Responded
        } else {
            match raw_status.parse::<ContactStatus>() {
                Ok(status) => status,
                Err(e) => {
                    let _ = writeln!(out, "{e}");
                    continue;
                }
            }
        };

        let _ = write!(out, "notes> ");
        let _ = out.flush();
        let notes = next_line(&mut lines, path).await?.unwrap_or_default();

        let request = MarkRequest::responded(email.as_str())
            .with_status(Some(status))
            .with_notes(notes, NotesPolicy::Replace);
        let outcome = ledger.apply_mark(&request)?;
        ledger.save(path)?;
        marked += 1;
        let _ = writeln!(out, "Marked {} as {}", outcome.email, outcome.status);
    }

    Ok(marked)
}

async fn next_line<R>(
    lines: &mut tokio::io::Lines<R>,
    path: &Path,
) -> Result<Option<String>, LedgerError>
where
    R: AsyncBufRead + Unpin,
{
    lines
        .next_line()
        .await
        .map(|line| line.map(|l| l.trim().to_string()))
        .map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Contact;
    use chrono::NaiveDate;

    fn ledger() -> Ledger {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut ledger = Ledger::new();
        let mut alice = Contact::new("alice@x.com", today);
        alice.first_name = "Alice".into();
        ledger.upsert(alice);
        ledger.upsert(Contact::new("bob@x.com", today));
        ledger
    }

    #[tokio::test]
    async fn marks_with_default_status_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger = ledger();
        let mut out = Vec::new();

        let input: &[u8] = b"Alice@x.com\n\nwants a demo\nquit\n";
        let marked = run_marking_session(&mut ledger, &path, input, &mut out)
            .await
            .unwrap();

        assert_eq!(marked, 1);
        let alice = ledger.get("alice@x.com").unwrap();
        assert!(alice.answered);
        assert_eq!(alice.status, ContactStatus::Responded);
        assert_eq!(alice.notes, "wants a demo");

        let saved = Ledger::load(&path, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
        assert!(saved.get("alice@x.com").unwrap().answered);
    }

    #[tokio::test]
    async fn unknown_email_and_bad_status_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.csv");
        let mut ledger = ledger();
        let mut out = Vec::new();

        let input: &[u8] = b"ghost@x.com\nbob@x.com\nmaybe\nbob@x.com\nnot_interested\n\n";
        let marked = run_marking_session(&mut ledger, &path, input, &mut out)
            .await
            .unwrap();

        assert_eq!(marked, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Not found: ghost@x.com"));
        assert!(text.contains("Invalid status 'maybe'"));
        assert_eq!(
            ledger.get("bob@x.com").unwrap().status,
            ContactStatus::NotInterested
        );
    }
}
