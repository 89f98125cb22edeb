//! Configuration types.
//!
//! Everything is read from the environment once, in `main`, and passed down
//! explicitly. Lookups go through a closure so settings tests never touch the
//! process environment.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::campaign::Stage;
use crate::error::ConfigError;

pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_INBOX_FOLDER: &str = "INBOX";
pub const DEFAULT_DAYS_BEFORE_NUDGE1: u32 = 3;
pub const DEFAULT_DAYS_BEFORE_NUDGE2: u32 = 5;
/// 2m30s between two sends.
pub const DEFAULT_SEND_DELAY_SECS: u64 = 150;
pub const DEFAULT_RESPONSE_LOOKBACK_DAYS: u32 = 90;
pub const DEFAULT_SUBJECT: &str = "Introduction";

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP settings for outbound mail.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    /// Display name in `From`. Defaults to the user.
    pub sender_name: String,
    /// Defaults to the user.
    pub reply_to: String,
    /// Implicit TLS instead of STARTTLS. Also implied by port 465.
    pub use_ssl: bool,
    pub allow_insecure_tls: bool,
    /// Extra PEM root certificate for self-hosted servers.
    pub ca_cert: Option<PathBuf>,
    pub bcc: Option<String>,
    /// Log the SMTP exchange (`SMTP_DEBUG`).
    pub debug: bool,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let user = var(env, "SMTP_USER").unwrap_or_default();
        Ok(Self {
            host: var(env, "SMTP_HOST").unwrap_or_default(),
            port: parse_var(env, "SMTP_PORT")?.unwrap_or(DEFAULT_SMTP_PORT),
            password: SecretString::from(var(env, "SMTP_PASS").unwrap_or_default()),
            sender_name: var(env, "SENDER_NAME").unwrap_or_else(|| user.clone()),
            reply_to: var(env, "REPLY_TO").unwrap_or_else(|| user.clone()),
            use_ssl: flag(env, "SMTP_USE_SSL"),
            allow_insecure_tls: flag(env, "SMTP_ALLOW_INSECURE_TLS"),
            ca_cert: var(env, "SMTP_CA_CERT").map(PathBuf::from),
            bcc: var(env, "BCC_EMAIL"),
            debug: flag(env, "SMTP_DEBUG"),
            user,
        })
    }

    /// Implicit TLS on connect (SMTPS).
    pub fn implicit_tls(&self) -> bool {
        self.use_ssl || self.port == 465
    }

    /// Fail unless host and credentials are present. Checked before a real
    /// send; dry runs do not need them.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        require(&self.host, "SMTP_HOST", "Set the outbound mail server host.")?;
        require(&self.user, "SMTP_USER", "Set the SMTP login.")?;
        require(
            self.password.expose_secret(),
            "SMTP_PASS",
            "Set the SMTP password.",
        )?;
        if let Some(path) = &self.ca_cert
            && !path.is_file()
        {
            return Err(ConfigError::FileNotFound(path.clone()));
        }
        Ok(())
    }
}

// ── IMAP ────────────────────────────────────────────────────────────

/// IMAP settings for reply detection.
#[derive(Debug, Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: SecretString,
    pub folder: String,
}

impl ImapConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    /// IMAP credentials fall back to the SMTP ones.
    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            host: var(env, "IMAP_HOST").unwrap_or_default(),
            port: parse_var(env, "IMAP_PORT")?.unwrap_or(DEFAULT_IMAP_PORT),
            user: var(env, "IMAP_USER")
                .or_else(|| var(env, "SMTP_USER"))
                .unwrap_or_default(),
            password: SecretString::from(
                var(env, "IMAP_PASS")
                    .or_else(|| var(env, "SMTP_PASS"))
                    .unwrap_or_default(),
            ),
            folder: var(env, "INBOX_FOLDER").unwrap_or_else(|| DEFAULT_INBOX_FOLDER.to_string()),
        })
    }

    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        require(&self.host, "IMAP_HOST", "Set the inbox server host (port 993, TLS).")?;
        require(&self.user, "IMAP_USER", "Set IMAP_USER or SMTP_USER.")?;
        require(
            self.password.expose_secret(),
            "IMAP_PASS",
            "Set IMAP_PASS or SMTP_PASS.",
        )
    }
}

// ── Campaign ────────────────────────────────────────────────────────

/// Per-stage delays and subjects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSettings {
    pub days_before_nudge1: u32,
    pub days_before_nudge2: u32,
    pub subject_initial: String,
    pub subject_nudge1: String,
    pub subject_nudge2: String,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            days_before_nudge1: DEFAULT_DAYS_BEFORE_NUDGE1,
            days_before_nudge2: DEFAULT_DAYS_BEFORE_NUDGE2,
            subject_initial: DEFAULT_SUBJECT.to_string(),
            subject_nudge1: format!("Re: {DEFAULT_SUBJECT}"),
            subject_nudge2: format!("Re: {DEFAULT_SUBJECT}"),
        }
    }
}

impl StageSettings {
    /// Nudge subjects default to `Re: <initial subject>`.
    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let subject_initial = var(env, "EMAIL_SUBJECT").unwrap_or_else(|| DEFAULT_SUBJECT.to_string());
        let reply_subject = format!("Re: {subject_initial}");
        Ok(Self {
            days_before_nudge1: parse_var(env, "DAYS_BEFORE_NUDGE1")?
                .unwrap_or(DEFAULT_DAYS_BEFORE_NUDGE1),
            days_before_nudge2: parse_var(env, "DAYS_BEFORE_NUDGE2")?
                .unwrap_or(DEFAULT_DAYS_BEFORE_NUDGE2),
            subject_nudge1: var(env, "EMAIL_SUBJECT_NUDGE1").unwrap_or_else(|| reply_subject.clone()),
            subject_nudge2: var(env, "EMAIL_SUBJECT_NUDGE2").unwrap_or(reply_subject),
            subject_initial,
        })
    }

    /// Minimum whole days since the prior stage.
    pub fn min_delay_days(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Initial => 0,
            Stage::Nudge1 => self.days_before_nudge1,
            Stage::Nudge2 => self.days_before_nudge2,
        }
    }

    pub fn subject(&self, stage: Stage) -> &str {
        match stage {
            Stage::Initial => &self.subject_initial,
            Stage::Nudge1 => &self.subject_nudge1,
            Stage::Nudge2 => &self.subject_nudge2,
        }
    }
}

/// Complete campaign configuration.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub smtp: SmtpConfig,
    pub imap: ImapConfig,
    pub stages: StageSettings,
    pub send_delay: Duration,
    pub template_dir: PathBuf,
    pub video_url: String,
    /// Accent-folded, lowercased keywords every campaign reply subject contains.
    pub campaign_keywords: Vec<String>,
    pub response_lookback_days: u32,
}

impl CampaignConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&env_lookup)
    }

    pub fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            smtp: SmtpConfig::from_lookup(env)?,
            imap: ImapConfig::from_lookup(env)?,
            stages: StageSettings::from_lookup(env)?,
            send_delay: Duration::from_secs(
                parse_var(env, "SEND_DELAY_SECONDS")?.unwrap_or(DEFAULT_SEND_DELAY_SECS),
            ),
            template_dir: var(env, "TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            video_url: var(env, "VIDEO_URL").unwrap_or_default(),
            campaign_keywords: var(env, "CAMPAIGN_KEYWORDS")
                .map(|raw| {
                    raw.split(',')
                        .map(crate::channels::imap::fold_subject)
                        .map(|k| k.trim().to_string())
                        .filter(|k| !k.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            response_lookback_days: parse_var(env, "RESPONSE_LOOKBACK_DAYS")?
                .unwrap_or(DEFAULT_RESPONSE_LOOKBACK_DAYS),
        })
    }

    /// Addresses that belong to the operator; replies from them are ignored.
    pub fn own_addresses(&self) -> Vec<String> {
        let mut own: Vec<String> = [&self.smtp.user, &self.imap.user, &self.smtp.reply_to]
            .into_iter()
            .map(|a| crate::ledger::normalize_email(a))
            .filter(|a| !a.is_empty())
            .collect();
        own.sort();
        own.dedup();
        own
    }
}

// ── Environment ─────────────────────────────────────────────────────

/// Load `.env` from the working directory or one of its parents. Variables
/// already set in the process win. Returns the file that was read.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

/// Load an explicit environment file. Variables already set win.
pub fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }
    dotenvy::from_path(path).map_err(|e| ConfigError::InvalidValue {
        key: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Whether `SMTP_DEBUG` asks for the SMTP conversation in the logs.
pub fn smtp_debug_enabled() -> bool {
    flag(&env_lookup, "SMTP_DEBUG")
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// A set, non-blank variable.
fn var(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T>(env: &dyn Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(env, key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}': {e}"),
            })
        })
        .transpose()
}

fn flag(env: &dyn Fn(&str) -> Option<String>, key: &str) -> bool {
    var(env, key).is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn require(value: &str, key: &str, hint: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = CampaignConfig::from_lookup(&lookup(&[])).unwrap();
        assert_eq!(cfg.smtp.port, DEFAULT_SMTP_PORT);
        assert_eq!(cfg.imap.port, DEFAULT_IMAP_PORT);
        assert_eq!(cfg.imap.folder, "INBOX");
        assert_eq!(cfg.stages.min_delay_days(Stage::Nudge1), 3);
        assert_eq!(cfg.stages.min_delay_days(Stage::Nudge2), 5);
        assert_eq!(cfg.send_delay, Duration::from_secs(150));
        assert_eq!(cfg.response_lookback_days, 90);
        assert!(cfg.campaign_keywords.is_empty());
        assert!(cfg.smtp.bcc.is_none());
    }

    #[test]
    fn sender_fields_default_to_user() {
        let cfg = SmtpConfig::from_lookup(&lookup(&[("SMTP_USER", "me@agence.fr")])).unwrap();
        assert_eq!(cfg.sender_name, "me@agence.fr");
        assert_eq!(cfg.reply_to, "me@agence.fr");
    }

    #[test]
    fn imap_falls_back_to_smtp_credentials() {
        let cfg = ImapConfig::from_lookup(&lookup(&[
            ("SMTP_USER", "me@agence.fr"),
            ("SMTP_PASS", "hunter2"),
        ]))
        .unwrap();
        assert_eq!(cfg.user, "me@agence.fr");
        assert_eq!(cfg.password.expose_secret(), "hunter2");
    }

    #[test]
    fn invalid_number_is_an_error() {
        let err = CampaignConfig::from_lookup(&lookup(&[("DAYS_BEFORE_NUDGE1", "three")]));
        assert!(matches!(err, Err(ConfigError::InvalidValue { key, .. }) if key == "DAYS_BEFORE_NUDGE1"));
    }

    #[test]
    fn boolean_flags_accept_loose_values() {
        let cfg = SmtpConfig::from_lookup(&lookup(&[
            ("SMTP_USE_SSL", "Yes"),
            ("SMTP_ALLOW_INSECURE_TLS", "0"),
        ]))
        .unwrap();
        assert!(cfg.use_ssl);
        assert!(!cfg.allow_insecure_tls);
    }

    #[test]
    fn smtp_debug_flag_is_read() {
        let cfg = SmtpConfig::from_lookup(&lookup(&[("SMTP_DEBUG", "true")])).unwrap();
        assert!(cfg.debug);
        let cfg = SmtpConfig::from_lookup(&lookup(&[])).unwrap();
        assert!(!cfg.debug);
    }

    #[test]
    fn env_file_is_loaded_without_overriding_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "OUTREACH_ENV_FILE_TEST=from-file\nPATH=/nowhere\n",
        )
        .unwrap();
        let path_before = std::env::var("PATH").ok();

        load_env_file(&path).unwrap();
        assert_eq!(std::env::var("OUTREACH_ENV_FILE_TEST").unwrap(), "from-file");
        assert_eq!(std::env::var("PATH").ok(), path_before);
    }

    #[test]
    fn missing_env_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_env_file(&dir.path().join("absent.env")),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn port_465_implies_implicit_tls() {
        let cfg = SmtpConfig::from_lookup(&lookup(&[("SMTP_PORT", "465")])).unwrap();
        assert!(cfg.implicit_tls());
    }

    #[test]
    fn nudge_subjects_follow_initial_subject() {
        let stages = StageSettings::from_lookup(&lookup(&[("EMAIL_SUBJECT", "Projet logiciel")])).unwrap();
        assert_eq!(stages.subject(Stage::Initial), "Projet logiciel");
        assert_eq!(stages.subject(Stage::Nudge1), "Re: Projet logiciel");
    }

    #[test]
    fn missing_credentials_are_reported() {
        let cfg = SmtpConfig::from_lookup(&lookup(&[("SMTP_HOST", "smtp.agence.fr")])).unwrap();
        assert!(matches!(
            cfg.require_credentials(),
            Err(ConfigError::MissingRequired { key, .. }) if key == "SMTP_USER"
        ));
    }

    #[test]
    fn keywords_are_folded() {
        let cfg = CampaignConfig::from_lookup(&lookup(&[(
            "CAMPAIGN_KEYWORDS",
            "École Polytechnique, Agences Immobilières ,",
        )]))
        .unwrap();
        assert_eq!(
            cfg.campaign_keywords,
            vec!["ecole polytechnique", "agences immobilieres"]
        );
    }

    #[test]
    fn own_addresses_are_normalized_and_deduplicated() {
        let cfg = CampaignConfig::from_lookup(&lookup(&[("SMTP_USER", "Me@Agence.fr")])).unwrap();
        assert_eq!(cfg.own_addresses(), vec!["me@agence.fr"]);
    }
}
