//! Outreach: file-based outbound email campaigns.

pub mod campaign;
pub mod channels;
pub mod config;
pub mod error;
pub mod ledger;
pub mod responses;
