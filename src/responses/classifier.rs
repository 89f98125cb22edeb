//! Reply classification.
//!
//! Runs before any ledger lookup to drop what is not a prospect's reply:
//! - empty, own, or system senders (postmaster, noreply, bounces) → System
//! - out-of-office and "no longer with" replies → AutomaticReply
//!
//! Matching is case-insensitive substring matching on fixed keyword lists.

use serde::Serialize;
use tracing::debug;

/// Classification of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseKind {
    /// Not from a prospect. Dropped.
    System { reason: String },
    /// Auto-generated reply. Reported, never marked.
    AutomaticReply { pattern: String },
    /// A real reply.
    Genuine,
}

const SYSTEM_SENDER_KEYWORDS: &[&str] = &[
    "postmaster",
    "mailer-daemon",
    "noreply",
    "no-reply",
    "donotreply",
    "reponse.auto",
    "reponse-auto",
    "auto-reponse",
    "mailinblack.com",
    "onmicrosoft.com",
    "undeliverable",
    "bounce",
    "returned",
    "delivery failure",
];

const AUTO_REPLY_KEYWORDS: &[&str] = &[
    "réponse automatique",
    "automatic reply",
    "auto-reply",
    "out of office",
    "absence",
    "absent",
    "congés",
    "vacation",
    "vacances",
    "en congé",
    "away from office",
    "ne fait plus partie",
    "no longer with",
    "has left",
    "n'est plus",
    "déménagement",
    "transfert",
    "redirection",
    "forward",
    "automatique",
    "automated",
    "robot",
    "noreply",
    "no-reply",
    "donotreply",
    "do-not-reply",
    "undeliverable",
];

/// Keyword-based response classifier.
#[derive(Debug, Clone)]
pub struct ResponseClassifier {
    system_keywords: Vec<String>,
    auto_keywords: Vec<String>,
    own_addresses: Vec<String>,
}

impl ResponseClassifier {
    /// Classifier with the built-in keyword lists.
    pub fn default_rules() -> Self {
        Self {
            system_keywords: SYSTEM_SENDER_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            auto_keywords: AUTO_REPLY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            own_addresses: Vec::new(),
        }
    }

    /// Treat mail from these addresses as System.
    pub fn with_own_addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.own_addresses.extend(
            addresses
                .into_iter()
                .map(|a| a.as_ref().trim().to_lowercase())
                .filter(|a| !a.is_empty()),
        );
        self
    }

    /// Classify a message. Total: every input gets exactly one kind.
    pub fn classify(&self, subject: &str, sender: &str, snippet: &str) -> ResponseKind {
        let sender = sender.trim().to_lowercase();
        if sender.is_empty() {
            return ResponseKind::System {
                reason: "empty sender".into(),
            };
        }
        if self.own_addresses.iter().any(|own| *own == sender) {
            return ResponseKind::System {
                reason: "own address".into(),
            };
        }
        if let Some(keyword) = self.system_keywords.iter().find(|k| sender.contains(k.as_str())) {
            debug!(sender = %sender, keyword = %keyword, "System sender");
            return ResponseKind::System {
                reason: format!("system sender ({keyword})"),
            };
        }

        let subject = subject.to_lowercase();
        let snippet = snippet.to_lowercase();
        if let Some(keyword) = self
            .auto_keywords
            .iter()
            .find(|k| subject.contains(k.as_str()) || snippet.contains(k.as_str()))
        {
            debug!(sender = %sender, keyword = %keyword, "Automatic reply");
            return ResponseKind::AutomaticReply {
                pattern: keyword.clone(),
            };
        }

        ResponseKind::Genuine
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> ResponseClassifier {
        ResponseClassifier::default_rules().with_own_addresses(["me@agence.fr"])
    }

    #[test]
    fn noreply_sender_is_system() {
        let c = classifier();
        for sender in ["noreply@service.io", "NoReply-alerts@bank.fr", "x.noreply@y.com"] {
            assert!(
                matches!(c.classify("Hello", sender, "Hi"), ResponseKind::System { .. }),
                "{sender}"
            );
        }
    }

    #[test]
    fn bounces_are_system() {
        let c = classifier();
        assert!(matches!(
            c.classify("Undelivered Mail", "MAILER-DAEMON@mx.agence.fr", ""),
            ResponseKind::System { .. }
        ));
        assert!(matches!(
            c.classify("Re: projet", "postmaster@outlook.com", ""),
            ResponseKind::System { .. }
        ));
    }

    #[test]
    fn own_and_empty_senders_are_system() {
        let c = classifier();
        assert_eq!(
            c.classify("Re: projet", " Me@Agence.fr ", "test"),
            ResponseKind::System {
                reason: "own address".into()
            }
        );
        assert!(matches!(c.classify("Re: projet", "", ""), ResponseKind::System { .. }));
    }

    #[test]
    fn out_of_office_is_automatic() {
        let c = classifier();
        assert!(matches!(
            c.classify("Réponse automatique : Re: Projet", "jean@agence.fr", ""),
            ResponseKind::AutomaticReply { .. }
        ));
        assert!(matches!(
            c.classify("Re: Projet", "jean@agence.fr", "I am OUT OF OFFICE until Monday"),
            ResponseKind::AutomaticReply { .. }
        ));
        assert!(matches!(
            c.classify("Re: Projet", "jean@agence.fr", "Marie ne fait plus partie de l'agence"),
            ResponseKind::AutomaticReply { .. }
        ));
    }

    #[test]
    fn real_reply_is_genuine() {
        let c = classifier();
        assert_eq!(
            c.classify("Re: Projet logiciel", "jean.dupont@agence.fr", "Bonjour, je suis intéressé."),
            ResponseKind::Genuine
        );
    }

    #[test]
    fn system_takes_precedence_over_automatic() {
        let c = classifier();
        assert!(matches!(
            c.classify("Automatic reply", "no-reply@x.com", ""),
            ResponseKind::System { .. }
        ));
    }
}
