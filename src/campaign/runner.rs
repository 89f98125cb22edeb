//! Sequential campaign run over the ledger.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use super::gate::{GateDecision, gate};
use super::stage::Stage;
use super::template::{Template, contact_vars};
use crate::channels::{MailTransport, OutboundEmail};
use crate::error::{ChannelError, LedgerError};
use crate::ledger::{Contact, Ledger, normalize_email};

const PROGRESS_WIDTH: usize = 30;
const EXCLUDED: &str = "excluded";

/// `[#####-----] i/n (p%)`
pub fn format_progress(current: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}] 0/0 (0%)", "-".repeat(width));
    }
    let filled = (width * current / total).min(width);
    format!(
        "[{}{}] {current}/{total} ({}%)",
        "#".repeat(filled),
        "-".repeat(width - filled),
        current * 100 / total
    )
}

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub stage: Stage,
    pub subject: String,
    pub min_delay_days: u32,
    /// Pause between two sends.
    pub send_delay: Duration,
    pub dry_run: bool,
    pub bcc: Option<String>,
    pub video_url: String,
    /// Emails never sent the first message.
    pub exclude: HashSet<String>,
}

/// Counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: usize,
    pub eligible: usize,
    /// Sends accepted by the transport (or that would be, on a dry run).
    pub sent: usize,
    pub failed: usize,
    pub skipped: BTreeMap<&'static str, usize>,
    pub dry_run: bool,
}

impl RunSummary {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verb = if self.dry_run { "would send" } else { "sent" };
        write!(
            f,
            "{verb} {} of {} contacts ({} eligible, {} failed, {} skipped",
            self.sent,
            self.total,
            self.eligible,
            self.failed,
            self.skipped_total()
        )?;
        for (reason, count) in &self.skipped {
            write!(f, ", {reason}: {count}")?;
        }
        f.write_str(")")
    }
}

/// Runs one stage: gate every contact, then send to the eligible ones in
/// email order, persisting the ledger after each accepted send.
pub struct CampaignRunner {
    transport: Arc<dyn MailTransport>,
    template: Template,
    options: RunOptions,
}

impl CampaignRunner {
    pub fn new(transport: Arc<dyn MailTransport>, template: Template, options: RunOptions) -> Self {
        Self {
            transport,
            template,
            options,
        }
    }

    /// Gate every contact; returns the eligible emails.
    fn plan(&self, ledger: &Ledger, today: NaiveDate, summary: &mut RunSummary) -> Vec<String> {
        let stage = self.options.stage;
        let total = ledger.len();
        let mut eligible = Vec::new();

        for (i, contact) in ledger.iter().enumerate() {
            let progress = format_progress(i + 1, total, PROGRESS_WIDTH);
            if stage == Stage::Initial && self.options.exclude.contains(&contact.email) {
                info!("{progress} {} excluded, skipping", contact.email);
                *summary.skipped.entry(EXCLUDED).or_default() += 1;
                continue;
            }
            match gate(contact, stage, today, self.options.min_delay_days) {
                GateDecision::Send => eligible.push(contact.email.clone()),
                GateDecision::Skip(reason) => {
                    info!("{progress} {} {reason}, skipping", contact.email);
                    *summary.skipped.entry(reason.label()).or_default() += 1;
                }
            }
        }
        eligible
    }

    fn compose(&self, contact: &Contact) -> OutboundEmail {
        OutboundEmail {
            to: contact.email.clone(),
            subject: self.options.subject.clone(),
            html_body: self
                .template
                .render(&contact_vars(contact, &self.options.video_url)),
            bcc: self.options.bcc.clone(),
        }
    }

    /// Run the stage. Transport failures are logged and counted; a ledger
    /// write failure aborts the run.
    pub async fn run(
        &self,
        ledger: &mut Ledger,
        ledger_path: &Path,
        today: NaiveDate,
    ) -> Result<RunSummary, LedgerError> {
        let stage = self.options.stage;
        let mut summary = RunSummary {
            total: ledger.len(),
            dry_run: self.options.dry_run,
            ..RunSummary::default()
        };

        let eligible = self.plan(ledger, today, &mut summary);
        summary.eligible = eligible.len();
        if let Some(contact) = eligible.first().and_then(|email| ledger.get(email)) {
            let vars = contact_vars(contact, &self.options.video_url);
            for key in self.template.unbound_keys(&vars) {
                warn!(
                    template = self.template.name(),
                    placeholder = %key,
                    "Placeholder has no ledger column and renders empty"
                );
            }
        }
        info!(
            stage = %stage,
            total = summary.total,
            eligible = summary.eligible,
            dry_run = self.options.dry_run,
            "Campaign planned"
        );

        let count = eligible.len();
        for (i, email) in eligible.iter().enumerate() {
            let progress = format_progress(i + 1, count, PROGRESS_WIDTH);
            let Some(contact) = ledger.get(email) else {
                continue;
            };
            let message = self.compose(contact);
            let name = contact.display_name();

            if self.options.dry_run {
                info!("{progress} [DRY RUN] would send {stage} to {email} ({name})");
                summary.sent += 1;
                continue;
            }

            match self.transport.send(&message).await {
                Ok(()) => {
                    if let Some(contact) = ledger.get_mut(email) {
                        stage.stamp(contact, today);
                    }
                    ledger.save(ledger_path)?;
                    summary.sent += 1;
                    info!("{progress} {stage} sent to {email} ({name})");
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("{progress} {stage} failed for {email}: {e}");
                }
            }

            if i + 1 < count && !self.options.send_delay.is_zero() {
                info!("Pausing {}s before the next send", self.options.send_delay.as_secs());
                tokio::time::sleep(self.options.send_delay).await;
            }
        }

        if summary.failed > 0 {
            warn!(failed = summary.failed, "Some sends failed; they stay eligible for the next run");
        }
        info!(stage = %stage, "Campaign finished: {summary}");
        Ok(summary)
    }
}

/// Render the first-contact template for `contact` and send it. The ledger
/// is not touched.
pub async fn send_test(
    transport: &dyn MailTransport,
    template: &Template,
    contact: &Contact,
    subject: &str,
    video_url: &str,
) -> Result<(), ChannelError> {
    let message = OutboundEmail {
        to: normalize_email(&contact.email),
        subject: subject.to_string(),
        html_body: template.render(&contact_vars(contact, video_url)),
        bcc: None,
    };
    transport.send(&message).await?;
    info!(to = %message.to, template = template.name(), "Test email sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(
            format_progress(1, 4, 8),
            "[##------] 1/4 (25%)"
        );
        assert_eq!(format_progress(4, 4, 8), "[########] 4/4 (100%)");
        assert_eq!(format_progress(0, 0, 4), "[----] 0/0 (0%)");
    }

    #[test]
    fn summary_display_lists_skip_reasons() {
        let mut summary = RunSummary {
            total: 5,
            eligible: 2,
            sent: 1,
            failed: 1,
            ..RunSummary::default()
        };
        summary.skipped.insert("already_answered", 2);
        summary.skipped.insert("too_soon", 1);
        assert_eq!(
            summary.to_string(),
            "sent 1 of 5 contacts (2 eligible, 1 failed, 3 skipped, already_answered: 2, too_soon: 1)"
        );
    }
}
