use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, fmt};

use outreach::campaign::{
    CampaignRunner, RunOptions, Stage, Template, load_exclusion_set, send_test,
};
use outreach::channels::cli::run_marking_session;
use outreach::channels::{ImapInbox, MailTransport, SmtpMailer};
use outreach::config::{self, CampaignConfig};
use outreach::error::ConfigError;
use outreach::ledger::mark::{mark_bulk_not_interested, parse_email_list};
use outreach::ledger::merge::merge_directory;
use outreach::ledger::csv_io::read_table;
use outreach::ledger::{
    Contact, ContactStatus, Ledger, MarkRequest, NotesPolicy, first_valid_contact, normalize_email,
};
use outreach::responses::report::{self, DEFAULT_REPORT_FILE};
use outreach::responses::{self, ResponseClassifier};

const EXIT_SUCCESS: u8 = 0;
const EXIT_ERROR: u8 = 1;

// ── Command line ────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "outreach")]
#[command(about = "File-based outbound email campaigns")]
#[command(version)]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Environment file to load instead of searching for `.env`
    #[arg(long, global = true, value_name = "PATH")]
    env_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the first message to every contact not contacted yet
    #[command(after_help = "\
Examples:
  outreach send contacts.csv --dry-run
  outreach send contacts.csv --exclude already_sent/ --delay 60")]
    Send {
        /// Ledger CSV file
        ledger: PathBuf,

        /// CSV file, or directory of CSV files, whose emails are skipped
        #[arg(long, value_name = "PATH")]
        exclude: Option<PathBuf>,

        /// Seconds between two sends (overrides SEND_DELAY_SECONDS)
        #[arg(long, value_name = "SECONDS")]
        delay: Option<u64>,

        /// Log what would be sent; send nothing, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Send a follow-up to contacts who have not replied
    Nudge {
        /// Ledger CSV file
        ledger: PathBuf,

        /// Which follow-up: nudge1 or nudge2
        #[arg(value_parser = Stage::parse_nudge)]
        stage: Stage,

        /// Seconds between two sends (overrides SEND_DELAY_SECONDS)
        #[arg(long, value_name = "SECONDS")]
        delay: Option<u64>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Send the first-contact template to a single address
    SendTest {
        email: String,

        #[arg(long, default_value = "Test")]
        first_name: String,
    },

    /// Send the first-contact template to the first valid row of a CSV
    SendFirst {
        /// Contacts CSV file
        csv: PathBuf,
    },

    /// Consolidate every CSV in a directory into the master ledger
    Merge {
        /// Master ledger (created if missing)
        master: PathBuf,

        /// Directory of source CSV files
        source_dir: PathBuf,

        /// Where to write the result (defaults to the master)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Scan the inbox for campaign replies and reconcile them with the ledger
    CheckResponses {
        ledger: PathBuf,

        /// Report file
        #[arg(long, default_value = DEFAULT_REPORT_FILE)]
        report: PathBuf,

        /// Write the detected replies into the ledger
        #[arg(long)]
        apply: bool,

        /// Print the planned ledger changes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a reply outcome on one contact
    Mark {
        ledger: PathBuf,

        email: String,

        /// Whether the contact answered
        #[arg(long, value_parser = parse_yes_no, value_name = "yes|no")]
        answered: Option<bool>,

        #[arg(long)]
        status: Option<ContactStatus>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Mark every email listed in a file as not interested
    MarkBulk {
        ledger: PathBuf,

        /// One email per line
        file: PathBuf,
    },

    /// Mark replies by hand from the terminal
    MarkInteractive { ledger: PathBuf },
}

fn parse_yes_no(raw: &str) -> Result<bool, String> {
    match raw.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" | "1" => Ok(true),
        "no" | "n" | "false" | "0" => Ok(false),
        other => Err(format!("expected yes or no, got '{other}'")),
    }
}

// ── Logging ─────────────────────────────────────────────────────────

/// Keeps the file log writer alive until exit.
type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

fn init_tracing(log_file: Option<&Path>, smtp_debug: bool) -> LogGuard {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // SMTP_DEBUG surfaces lettre's wire trace
    if smtp_debug && let Ok(directive) = "lettre=trace".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "outreach.log".into());
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(file_layer)
        .init();
    guard
}

// ── Entry point ─────────────────────────────────────────────────────

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn require_file(path: &Path) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(ConfigError::FileNotFound(path.to_path_buf()))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_ERROR)
            } else {
                ExitCode::from(EXIT_SUCCESS)
            };
        }
    };

    // Environment files must be read before anything consults the environment
    let env_file = match &cli.env_file {
        Some(path) => config::load_env_file(path).map(|()| Some(path.clone())),
        None => Ok(config::load_dotenv()),
    };

    let _guard = init_tracing(cli.log_file.as_deref(), config::smtp_debug_enabled());

    match env_file {
        Ok(Some(path)) => debug!(path = %path.display(), "Loaded environment file"),
        Ok(None) => debug!("No .env file found, using the process environment"),
        Err(e) => {
            error!("{e}");
            return ExitCode::from(EXIT_ERROR);
        }
    }

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Send {
            ledger,
            exclude,
            delay,
            dry_run,
        } => cmd_campaign(&ledger, Stage::Initial, exclude.as_deref(), delay, dry_run).await,
        Commands::Nudge {
            ledger,
            stage,
            delay,
            dry_run,
        } => cmd_campaign(&ledger, stage, None, delay, dry_run).await,
        Commands::SendTest { email, first_name } => {
            let contact = Contact {
                email: normalize_email(&email),
                first_name,
                ..Contact::default()
            };
            cmd_send_test(&contact).await
        }
        Commands::SendFirst { csv } => cmd_send_first(&csv).await,
        Commands::Merge {
            master,
            source_dir,
            output,
        } => cmd_merge(&master, &source_dir, output.as_deref()),
        Commands::CheckResponses {
            ledger,
            report,
            apply,
            json,
        } => cmd_check_responses(&ledger, &report, apply, json).await,
        Commands::Mark {
            ledger,
            email,
            answered,
            status,
            notes,
        } => cmd_mark(&ledger, &email, answered, status, notes),
        Commands::MarkBulk { ledger, file } => cmd_mark_bulk(&ledger, &file),
        Commands::MarkInteractive { ledger } => cmd_mark_interactive(&ledger).await,
    }
}

// ── Commands ────────────────────────────────────────────────────────

async fn cmd_campaign(
    ledger_path: &Path,
    stage: Stage,
    exclude: Option<&Path>,
    delay: Option<u64>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let config = CampaignConfig::from_env()?;
    require_file(ledger_path)?;
    let template = Template::load(&config.template_dir, stage)?;
    if !dry_run {
        config.smtp.require_credentials()?;
    }

    let today = today();
    let mut ledger = Ledger::load(ledger_path, today)?;
    let exclude = match exclude {
        Some(path) => load_exclusion_set(path)?,
        None => Default::default(),
    };

    let options = RunOptions {
        stage,
        subject: config.stages.subject(stage).to_string(),
        min_delay_days: config.stages.min_delay_days(stage),
        send_delay: delay.map(Duration::from_secs).unwrap_or(config.send_delay),
        dry_run,
        bcc: config.smtp.bcc.clone(),
        video_url: config.video_url.clone(),
        exclude,
    };
    let transport: Arc<dyn MailTransport> = Arc::new(SmtpMailer::new(config.smtp.clone()));
    let runner = CampaignRunner::new(transport, template, options);

    let summary = runner.run(&mut ledger, ledger_path, today).await?;
    println!("{summary}");
    Ok(())
}

async fn cmd_send_test(contact: &Contact) -> anyhow::Result<()> {
    let config = CampaignConfig::from_env()?;
    let template = Template::load(&config.template_dir, Stage::Initial)?;
    config.smtp.require_credentials()?;

    let mailer = SmtpMailer::new(config.smtp.clone());
    send_test(
        &mailer,
        &template,
        contact,
        config.stages.subject(Stage::Initial),
        &config.video_url,
    )
    .await
    .with_context(|| format!("test send to {} failed", contact.email))?;
    println!("Test email sent to {}", contact.email);
    Ok(())
}

async fn cmd_send_first(csv: &Path) -> anyhow::Result<()> {
    require_file(csv)?;
    let table = read_table(csv)?;
    let contact = first_valid_contact(&table, today())?;
    info!(email = %contact.email, name = %contact.display_name(), "First valid row");
    cmd_send_test(&contact).await
}

fn cmd_merge(master: &Path, source_dir: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    if !source_dir.is_dir() {
        return Err(ConfigError::FileNotFound(source_dir.to_path_buf()).into());
    }
    let output = output.unwrap_or(master);
    let (ledger, report) = merge_directory(master, source_dir, output, today())?;

    for (file, stats) in &report.files {
        println!(
            "{}: {} new, {} existing, {} filled, {} skipped",
            file.display(),
            stats.new,
            stats.existing,
            stats.filled,
            stats.skipped_rows
        );
    }
    for (file, reason) in &report.failed {
        println!("{}: failed ({reason})", file.display());
    }
    println!(
        "{} contacts written to {} ({} new)",
        ledger.len(),
        output.display(),
        report.total.new
    );
    Ok(())
}

async fn cmd_check_responses(
    ledger_path: &Path,
    report_path: &Path,
    apply: bool,
    json: bool,
) -> anyhow::Result<()> {
    let config = CampaignConfig::from_env()?;
    require_file(ledger_path)?;
    config.imap.require_credentials()?;
    if config.campaign_keywords.is_empty() {
        warn!("CAMPAIGN_KEYWORDS is empty, every inbox message counts as a campaign reply");
    }

    let today = today();
    let mut ledger = Ledger::load(ledger_path, today)?;
    let classifier = ResponseClassifier::default_rules().with_own_addresses(config.own_addresses());
    let query = responses::campaign_query(
        &config.campaign_keywords,
        today,
        config.response_lookback_days,
    );
    let inbox = ImapInbox::new(config.imap.clone());
    let triage = responses::collect(&inbox, &classifier, &query).await?;

    let plan = responses::reconcile(&ledger, &triage.genuine, today);
    let text = report::render(&ledger, &plan, &triage.automatic);
    report::write_report(report_path, &text)?;
    info!(path = %report_path.display(), "Report written");

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    }

    if plan.is_empty() {
        println!("No new responses to record");
        return Ok(());
    }
    if !apply {
        println!(
            "{} known and {} new responders found; run again with --apply to record them",
            plan.updates.len(),
            plan.inserts.len()
        );
        return Ok(());
    }

    let summary = responses::apply(&mut ledger, &plan);
    ledger.save(ledger_path)?;
    println!(
        "Marked {} contacts, added {} new contacts",
        summary.marked, summary.inserted
    );
    Ok(())
}

fn cmd_mark(
    ledger_path: &Path,
    email: &str,
    answered: Option<bool>,
    status: Option<ContactStatus>,
    notes: Option<String>,
) -> anyhow::Result<()> {
    require_file(ledger_path)?;
    let mut ledger = Ledger::load(ledger_path, today())?;

    let answered = answered.unwrap_or(true);
    let status = status.or(answered.then_some(ContactStatus::Responded));
    let mut request = MarkRequest::responded(email)
        .with_answered(answered)
        .with_status(status);
    if let Some(notes) = notes {
        request = request.with_notes(notes, NotesPolicy::Replace);
    }

    let outcome = ledger.apply_mark(&request)?;
    if outcome.changed {
        ledger.save(ledger_path)?;
        println!("{} marked {}", outcome.email, outcome.status);
    } else {
        println!("{} already up to date", outcome.email);
    }
    Ok(())
}

fn cmd_mark_bulk(ledger_path: &Path, file: &Path) -> anyhow::Result<()> {
    require_file(ledger_path)?;
    require_file(file)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    let emails = parse_email_list(&content);

    let mut ledger = Ledger::load(ledger_path, today())?;
    let (marked, missing) = mark_bulk_not_interested(&mut ledger, &emails);
    if marked.iter().any(|m| m.changed) {
        ledger.save(ledger_path)?;
    }
    for email in &missing {
        warn!(email = %email, "Not in ledger");
    }
    println!(
        "{} marked not_interested, {} not found",
        marked.iter().filter(|m| m.changed).count(),
        missing.len()
    );
    Ok(())
}

async fn cmd_mark_interactive(ledger_path: &Path) -> anyhow::Result<()> {
    require_file(ledger_path)?;
    let mut ledger = Ledger::load(ledger_path, today())?;
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stderr = std::io::stderr();
    let marked = run_marking_session(&mut ledger, ledger_path, stdin, &mut stderr).await?;
    println!("{marked} contacts marked");
    Ok(())
}
