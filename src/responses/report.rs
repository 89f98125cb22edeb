//! Plain-text response analysis report.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};

use super::AutomaticReply;
use super::reconciler::ReconcilePlan;
use crate::error::LedgerError;
use crate::ledger::Ledger;

/// Default report file name.
pub const DEFAULT_REPORT_FILE: &str = "response_analysis.txt";

const RULE_WIDE: usize = 60;
const RULE_NARROW: usize = 40;

/// Reply rate counted the way the report shows it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseRate {
    pub responded: usize,
    pub contacts: usize,
}

impl ResponseRate {
    /// `ledger` is the state before the plan is applied.
    pub fn compute(ledger: &Ledger, plan: &ReconcilePlan) -> Self {
        let already = ledger.iter().filter(|c| c.answered).count();
        Self {
            responded: already + plan.updates.len() + plan.inserts.len(),
            contacts: ledger.len() + plan.inserts.len(),
        }
    }

    pub fn percent(&self) -> f64 {
        if self.contacts == 0 {
            return 0.0;
        }
        self.responded as f64 / self.contacts as f64 * 100.0
    }
}

impl std::fmt::Display for ResponseRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.1}% ({}/{})", self.percent(), self.responded, self.contacts)
    }
}

fn fmt_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn section(out: &mut String, title: &str, count: usize) {
    let _ = writeln!(out, "{title} ({count}):");
    let _ = writeln!(out, "{}", "-".repeat(RULE_NARROW));
}

/// Render the report. `ledger` is the state before the plan is applied.
pub fn render(ledger: &Ledger, plan: &ReconcilePlan, automatic: &[AutomaticReply]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "RESPONSE ANALYSIS REPORT");
    let _ = writeln!(out, "{}\n", "=".repeat(RULE_WIDE));

    section(&mut out, "NEW REAL RESPONSES FROM EXISTING CONTACTS", plan.updates.len());
    for update in &plan.updates {
        let _ = writeln!(out, "• {} - {} ({})", update.email, update.name, update.company);
        let _ = writeln!(out, "  Subject: {}", update.subject);
        let _ = writeln!(out, "  Date: {}\n", fmt_date(update.date));
    }

    section(&mut out, "NEW CONTACTS WHO RESPONDED (NOT IN LEDGER)", plan.inserts.len());
    for insert in &plan.inserts {
        let _ = writeln!(out, "• {}", insert.contact.email);
        let _ = writeln!(out, "  Subject: {}", insert.subject);
        let _ = writeln!(out, "  Date: {}\n", fmt_date(insert.date));
    }

    section(&mut out, "AUTOMATIC RESPONSES FILTERED", automatic.len());
    for auto in automatic {
        let _ = writeln!(out, "• {} - {}", auto.message.sender, auto.message.subject);
        let _ = writeln!(out, "  Automatic response ({})\n", auto.pattern);
    }

    let (answered, waiting): (Vec<_>, Vec<_>) = ledger.iter().partition(|c| c.answered);

    section(&mut out, "ALREADY MARKED AS RESPONDED", answered.len());
    for contact in &answered {
        let _ = writeln!(
            out,
            "• {} - {} ({})",
            contact.email,
            contact.display_name(),
            contact.company_name
        );
        if !contact.notes.is_empty() {
            let _ = writeln!(out, "  Notes: {}", contact.notes);
        }
        out.push('\n');
    }

    section(&mut out, "NO RESPONSE YET", waiting.len());
    for contact in &waiting {
        let _ = writeln!(
            out,
            "• {} - {} ({}) - Status: {}",
            contact.email,
            contact.display_name(),
            contact.company_name,
            contact.status
        );
    }

    let _ = writeln!(out, "\nSUMMARY:");
    let _ = writeln!(out, "• Total contacts in ledger: {}", ledger.len());
    let _ = writeln!(
        out,
        "• Real responses found: {}",
        plan.updates.len() + plan.inserts.len() + plan.already_answered
    );
    let _ = writeln!(out, "  - From existing contacts (to mark): {}", plan.updates.len());
    let _ = writeln!(out, "  - From new contacts (to add): {}", plan.inserts.len());
    let _ = writeln!(out, "• Automatic responses filtered: {}", automatic.len());
    let _ = writeln!(out, "• Already marked responded: {}", answered.len());
    let _ = writeln!(out, "• Still no response: {}", waiting.len());
    let _ = writeln!(
        out,
        "• Real response rate: {}",
        ResponseRate::compute(ledger, plan)
    );

    out
}

pub fn write_report(path: &Path, report: &str) -> Result<(), LedgerError> {
    std::fs::write(path, report).map_err(|source| LedgerError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::InboundMessage;
    use crate::ledger::Contact;
    use crate::responses::reconciler::reconcile;
    use chrono::NaiveDate;

    fn reply(sender: &str) -> InboundMessage {
        InboundMessage {
            sender: sender.into(),
            subject: "Re: Projet".into(),
            date: None,
            snippet: String::new(),
        }
    }

    fn ledger() -> Ledger {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let mut ledger = Ledger::new();
        let mut a = Contact::new("a@x.com", today);
        a.answered = true;
        a.notes = "call back".into();
        ledger.upsert(a);
        ledger.upsert(Contact::new("b@x.com", today));
        ledger.upsert(Contact::new("c@x.com", today));
        ledger.upsert(Contact::new("d@x.com", today));
        ledger
    }

    #[test]
    fn rate_counts_existing_and_new_responders() {
        let ledger = ledger();
        let plan = reconcile(
            &ledger,
            &[reply("b@x.com"), reply("new@y.com")],
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        let rate = ResponseRate::compute(&ledger, &plan);
        assert_eq!(rate.responded, 3);
        assert_eq!(rate.contacts, 5);
        assert_eq!(rate.to_string(), "60.0% (3/5)");
    }

    #[test]
    fn empty_rate_is_zero() {
        let rate = ResponseRate::compute(&Ledger::new(), &ReconcilePlan::default());
        assert_eq!(rate.percent(), 0.0);
    }

    #[test]
    fn report_lists_every_section() {
        let ledger = ledger();
        let plan = reconcile(
            &ledger,
            &[reply("b@x.com")],
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        );
        let automatic = vec![AutomaticReply {
            message: reply("c@x.com"),
            pattern: "out of office".into(),
        }];
        let text = render(&ledger, &plan, &automatic);

        assert!(text.starts_with("RESPONSE ANALYSIS REPORT"));
        assert!(text.contains("NEW REAL RESPONSES FROM EXISTING CONTACTS (1):"));
        assert!(text.contains("NEW CONTACTS WHO RESPONDED (NOT IN LEDGER) (0):"));
        assert!(text.contains("AUTOMATIC RESPONSES FILTERED (1):"));
        assert!(text.contains("• c@x.com - Re: Projet"));
        assert!(text.contains("ALREADY MARKED AS RESPONDED (1):"));
        assert!(text.contains("  Notes: call back"));
        assert!(text.contains("NO RESPONSE YET (3):"));
        assert!(text.contains("Real response rate: 50.0% (2/4)"));
    }
}
