//! Reply detection: inbox fetch, classification, reconciliation, reporting.

pub mod classifier;
pub mod reconciler;
pub mod report;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::channels::imap::matches_campaign_subject;
use crate::channels::{Inbox, InboundMessage, InboxQuery};
use crate::error::ChannelError;

pub use classifier::{ResponseClassifier, ResponseKind};
pub use reconciler::{ApplySummary, ReconcilePlan, ResponseInsert, ResponseUpdate, apply, reconcile};

/// An auto-generated reply and the keyword that caught it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutomaticReply {
    pub message: InboundMessage,
    pub pattern: String,
}

/// Inbox messages sorted by kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Triage {
    pub genuine: Vec<InboundMessage>,
    pub automatic: Vec<AutomaticReply>,
    pub system: usize,
    /// Messages whose subject lacks a campaign keyword.
    pub off_campaign: usize,
}

/// Inbox query for replies received in the last `lookback_days`.
pub fn campaign_query(keywords: &[String], today: NaiveDate, lookback_days: u32) -> InboxQuery {
    InboxQuery {
        subject_keywords: keywords.to_vec(),
        since: today
            .checked_sub_days(Days::new(u64::from(lookback_days)))
            .unwrap_or(NaiveDate::MIN),
    }
}

/// Keep campaign replies and sort them by kind.
pub fn triage(
    classifier: &ResponseClassifier,
    messages: Vec<InboundMessage>,
    keywords: &[String],
) -> Triage {
    let mut triage = Triage::default();
    for message in messages {
        if !matches_campaign_subject(&message.subject, keywords) {
            debug!(subject = %message.subject, "Not a campaign reply");
            triage.off_campaign += 1;
            continue;
        }
        match classifier.classify(&message.subject, &message.sender, &message.snippet) {
            ResponseKind::System { reason } => {
                debug!(sender = %message.sender, reason = %reason, "Dropped system message");
                triage.system += 1;
            }
            ResponseKind::AutomaticReply { pattern } => {
                triage.automatic.push(AutomaticReply { message, pattern });
            }
            ResponseKind::Genuine => triage.genuine.push(message),
        }
    }
    triage
}

/// Fetch and triage campaign replies.
pub async fn collect(
    inbox: &dyn Inbox,
    classifier: &ResponseClassifier,
    query: &InboxQuery,
) -> Result<Triage, ChannelError> {
    let messages = inbox.fetch(query).await?;
    let fetched = messages.len();
    let triage = triage(classifier, messages, &query.subject_keywords);
    info!(
        fetched,
        genuine = triage.genuine.len(),
        automatic = triage.automatic.len(),
        system = triage.system,
        off_campaign = triage.off_campaign,
        inbox = inbox.name(),
        "Inbox triaged"
    );
    Ok(triage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StubInbox(Vec<InboundMessage>);

    #[async_trait]
    impl Inbox for StubInbox {
        fn name(&self) -> &str {
            "stub"
        }

        async fn fetch(&self, _query: &InboxQuery) -> Result<Vec<InboundMessage>, ChannelError> {
            Ok(self.0.clone())
        }
    }

    fn message(sender: &str, subject: &str, snippet: &str) -> InboundMessage {
        InboundMessage {
            sender: sender.into(),
            subject: subject.into(),
            date: None,
            snippet: snippet.into(),
        }
    }

    #[test]
    fn query_looks_back_from_today() {
        let q = campaign_query(&["projet".into()], NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(), 90);
        assert_eq!(q.since, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(q.subject_keywords, vec!["projet"]);
    }

    #[tokio::test]
    async fn collect_sorts_messages() {
        let inbox = StubInbox(vec![
            message("jean@agence.fr", "Re: Projet logiciel", "Oui, intéressé"),
            message("marie@agence.fr", "Réponse automatique: Projet logiciel", ""),
            message("noreply@agence.fr", "Projet logiciel", ""),
            message("paul@agence.fr", "Newsletter", ""),
        ]);
        let classifier = ResponseClassifier::default_rules();
        let query = campaign_query(&["projet".into()], NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(), 90);

        let triage = collect(&inbox, &classifier, &query).await.unwrap();
        assert_eq!(triage.genuine.len(), 1);
        assert_eq!(triage.genuine[0].sender, "jean@agence.fr");
        assert_eq!(triage.automatic.len(), 1);
        assert_eq!(triage.system, 1);
        assert_eq!(triage.off_campaign, 1);
    }
}
