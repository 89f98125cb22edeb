//! Error types for outreach.

use std::path::PathBuf;

/// Configuration-related errors. Always fatal, raised before any send.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Ledger and source-file errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{} has no header row", .0.display())]
    MissingHeader(PathBuf),

    #[error("{} has no email column", .0.display())]
    MissingEmailColumn(PathBuf),

    #[error("{} has no row with a valid email", .0.display())]
    NoValidRow(PathBuf),

    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Invalid status '{0}' (expected contacted, nudge1_sent, nudge2_sent, responded, not_interested or qualified)")]
    InvalidStatus(String),
}

/// Mail transport and inbox errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to send on {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("TLS setup failed for {name}: {reason}")]
    Tls { name: String, reason: String },

    #[error("Authentication failed for {name}: {reason}")]
    AuthFailed { name: String, reason: String },

    #[error("Inbox fetch failed: {0}")]
    Fetch(String),
}

/// Template loading errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Template not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to read template {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(#[from] regex::Error),
}
