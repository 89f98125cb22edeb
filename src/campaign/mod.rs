//! Campaign stages: eligibility gate, templates and the send loop.

pub mod exclusion;
pub mod gate;
pub mod runner;
pub mod stage;
pub mod template;

pub use exclusion::load_exclusion_set;
pub use gate::{GateDecision, SkipReason, gate};
pub use runner::{CampaignRunner, RunOptions, RunSummary, format_progress, send_test};
pub use stage::Stage;
pub use template::Template;
