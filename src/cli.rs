//! Command-line interface and interactive console

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use inquire::{Confirm, InquireError, Select, Text};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::auth;
use crate::client::{GmailClient, ProductionGmailClient, ProgressCallback};
use crate::config::Config;
use crate::error::{CleanerError, Result};
use crate::models::RuleKind;
use crate::orchestrator::{ClassificationPlan, Orchestrator, RunObserver, RunReport, Stage};
use crate::rules::RuleStore;

/// Number of planned moves printed after an analysis
const SAMPLE_MOVES: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "gmail-cleaner")]
#[command(version = "0.1.0")]
#[command(about = "Moves promotional Gmail messages into a dedicated folder", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Path to OAuth2 credentials file
    #[arg(long, default_value = "credentials.json")]
    pub credentials: PathBuf,

    /// Path to token cache file
    #[arg(long, default_value = ".gmail-cleaner/token.json")]
    pub token_cache: PathBuf,

    /// Write the run report here (`.json` for JSON, Markdown otherwise)
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Defaults to the interactive menu
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Authenticate with Gmail API
    Auth {
        /// Force re-authentication even if token exists
        #[arg(long)]
        force: bool,
    },

    /// Classify unread mail without changing anything
    Analyze {
        /// Move the promotional messages found without asking
        #[arg(long = "move")]
        move_now: bool,
    },

    /// Classify unread mail and move promotional messages
    Clean {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// View or extend the rule lists
    Rules {
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Test the Gmail connection
    Check,

    /// Generate example configuration file
    InitConfig {
        /// Path to create config file
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Interactive menu
    Menu,
}

#[derive(Subcommand, Debug)]
pub enum RulesCommand {
    /// Print one rule list
    List {
        /// senders, subjects or domains
        kind: RuleKind,
    },

    /// Append an entry to one rule list
    Add {
        /// senders, subjects or domains
        kind: RuleKind,
        entry: String,
    },
}

/// Truncate a string to max_len characters, adding "..." if truncated
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len.saturating_sub(3)).collect::<String>())
    }
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::with_multi_progress(MultiProgress::new())
    }

    /// Share a `MultiProgress` with the log writer so log lines print above bars
    pub fn with_multi_progress(multi: MultiProgress) -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");

        Self {
            multi,
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        let _ = self.multi.println(format!("  ✓ {}", msg));
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Shows one progress bar per batched stage
pub struct ConsoleObserver<'a> {
    reporter: &'a ProgressReporter,
    bars: Mutex<HashMap<&'static str, ProgressBar>>,
}

impl<'a> ConsoleObserver<'a> {
    pub fn new(reporter: &'a ProgressReporter) -> Self {
        Self {
            reporter,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn stage_key(stage: Stage) -> &'static str {
        match stage {
            Stage::ListUnread => "list",
            Stage::FetchMetadata => "fetch",
            Stage::Classify => "classify",
            Stage::ApplyLabel => "apply",
            Stage::Report => "report",
        }
    }
}

impl RunObserver for ConsoleObserver<'_> {
    fn stage_started(&self, stage: Stage, total: u64) -> ProgressCallback {
        let msg = match stage {
            Stage::FetchMetadata => "Fetching message metadata...",
            Stage::ApplyLabel => "Moving promotional messages...",
            _ => "Working...",
        };
        let pb = self.reporter.add_progress_bar(total, msg);
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(Self::stage_key(stage), pb.clone());
        }
        Arc::new(move |n| pb.inc(n))
    }

    fn stage_finished(&self, stage: Stage) {
        let pb = match self.bars.lock() {
            Ok(mut bars) => bars.remove(Self::stage_key(stage)),
            Err(_) => None,
        };
        if let Some(pb) = pb {
            let done = match stage {
                Stage::FetchMetadata => format!("Fetched metadata for {} messages", pb.position()),
                Stage::ApplyLabel => format!("Processed {} messages", pb.position()),
                _ => "Done".to_string(),
            };
            pb.finish_with_message(done);
        }
    }
}

/// Run `action` with a token that Ctrl-C cancels.
///
/// The listener only lives as long as the action, so an interactive session
/// can run several interruptible actions in turn.
pub async fn run_interruptible<F, Fut, T>(action: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current call");
                cancel.cancel();
            }
        })
    };

    let result = action(cancel).await;
    watcher.abort();
    result
}

/// Authenticate and build the pipeline around the production client
pub async fn connect(
    cli: &Cli,
    config: Config,
    reporter: &ProgressReporter,
) -> Result<Orchestrator<ProductionGmailClient>> {
    let spinner = reporter.add_spinner("Authenticating with Gmail API...");
    let hub = auth::initialize_gmail_hub(&cli.credentials, &cli.token_cache).await?;
    reporter.finish_spinner(&spinner, "Gmail API authenticated successfully");

    let client = ProductionGmailClient::new(hub, config.retry.request_timeout());
    Ok(Orchestrator::new(client, config))
}

fn print_report(report: &RunReport) {
    println!("\n========================================");
    println!("Run Summary ({})", report.mode);
    println!("========================================");
    println!("Run ID: {}", report.run_id);
    println!("Duration: {:.1} seconds", report.duration.as_secs_f64());
    println!("{}", report.summary_line());
    if report.fetch_failed_batches > 0 {
        println!(
            "Metadata batches failed: {} ({} messages unclassified)",
            report.fetch_failed_batches, report.unknown
        );
    }
    if report.label_failed_batches > 0 {
        println!(
            "Label batches failed: {} ({} messages not moved)",
            report.label_failed_batches, report.label_failed
        );
    }
    println!("========================================");
}

fn print_sample(plan: &ClassificationPlan) {
    if plan.moves.is_empty() {
        return;
    }
    println!("\nPromotional messages (showing {} of {}):", plan.moves.len().min(SAMPLE_MOVES), plan.moves.len());
    for planned in plan.moves.iter().take(SAMPLE_MOVES) {
        println!(
            "  - {} | {} ({})",
            truncate_string(&planned.sender, 40),
            truncate_string(&planned.subject, 50),
            planned.reason
        );
    }
}

/// A closed prompt (Esc, Ctrl-C) reads as "no"
fn confirm(question: &str) -> Result<bool> {
    match Confirm::new(question).with_default(false).prompt() {
        Ok(answer) => Ok(answer),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(false),
        Err(e) => Err(CleanerError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        ))),
    }
}

async fn commit_plan<C: GmailClient>(
    orchestrator: &Orchestrator<C>,
    plan: &ClassificationPlan,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<RunReport> {
    let observer = ConsoleObserver::new(reporter);
    let report = orchestrator.commit(plan, &observer, cancel).await?;
    print_report(&report);
    Ok(report)
}

/// Dry run; offers to move the result afterwards unless `move_now` is set
pub async fn analyze<C: GmailClient>(
    orchestrator: &Orchestrator<C>,
    store: &RuleStore,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
    move_now: bool,
) -> Result<RunReport> {
    let rules = store.load().await?;
    let observer = ConsoleObserver::new(reporter);
    let plan = orchestrator.plan(&rules, &observer, cancel).await?;

    let report = plan.dry_run_report();
    print_report(&report);
    print_sample(&plan);

    if plan.promotional.is_empty() {
        return Ok(report);
    }

    let question = format!(
        "Move {} promotional messages to '{}'?",
        plan.promotional.len(),
        plan.label_name
    );
    if move_now || confirm(&question)? {
        return commit_plan(orchestrator, &plan, reporter, cancel).await;
    }

    info!("Analysis only, nothing moved");
    Ok(report)
}

/// Classify and move in one go, confirming first unless `yes` is set
pub async fn clean<C: GmailClient>(
    orchestrator: &Orchestrator<C>,
    store: &RuleStore,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
    yes: bool,
) -> Result<RunReport> {
    let rules = store.load().await?;
    let observer = ConsoleObserver::new(reporter);
    let plan = orchestrator.plan(&rules, &observer, cancel).await?;

    if plan.promotional.is_empty() {
        let report = plan.dry_run_report();
        print_report(&report);
        return Ok(report);
    }

    let question = format!(
        "{} of {} unread messages look promotional. Move them to '{}'?",
        plan.promotional.len(),
        plan.total,
        plan.label_name
    );
    if !yes && !confirm(&question)? {
        println!("Nothing moved.");
        return Ok(plan.dry_run_report());
    }

    commit_plan(orchestrator, &plan, reporter, cancel).await
}

pub async fn list_rules(store: &RuleStore, kind: RuleKind) -> Result<()> {
    let entries = store.list(kind).await?;
    println!("\n{} ({:?}):", kind.title(), store.path(kind));
    if entries.is_empty() {
        println!("  (empty)");
    }
    for entry in &entries {
        println!("  - {}", entry);
    }
    Ok(())
}

pub async fn add_rule(store: &RuleStore, kind: RuleKind, entry: &str) -> Result<()> {
    store.add(kind, entry).await?;
    println!("Added '{}' to {}", entry.trim(), kind.title().to_lowercase());
    Ok(())
}

pub async fn check<C: GmailClient>(
    orchestrator: &Orchestrator<C>,
    reporter: &ProgressReporter,
    cancel: &CancellationToken,
) -> Result<()> {
    let spinner = reporter.add_spinner("Listing labels...");
    let report = orchestrator.check_connection(cancel).await?;
    reporter.finish_spinner(
        &spinner,
        &format!(
            "Connected: {} labels listed in {} ms",
            report.labels,
            report.latency.as_millis()
        ),
    );
    Ok(())
}

const MENU_ANALYZE: &str = "Analyze unread mail (dry run)";
const MENU_MOVE: &str = "Move promotional mail";
const MENU_RULES: &str = "Manage rules";
const MENU_CHECK: &str = "Check connection";
const MENU_EXIT: &str = "Exit";

/// `None` when the operator closed the prompt
fn select<T: std::fmt::Display>(question: &str, options: Vec<T>) -> Result<Option<T>> {
    match Select::new(question, options).prompt() {
        Ok(choice) => Ok(Some(choice)),
        Err(InquireError::OperationCanceled) | Err(InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(CleanerError::IoError(std::io::Error::new(
            std::io::ErrorKind::Other,
            e.to_string(),
        ))),
    }
}

async fn manage_rules(store: &RuleStore) -> Result<()> {
    let Some(kind) = select("Which list?", RuleKind::ALL.to_vec())? else {
        return Ok(());
    };

    match select("Action:", vec!["List entries", "Add entry", "Back"])? {
        Some("List entries") => list_rules(store, kind).await,
        Some("Add entry") => {
            let entry = match Text::new(&format!("New {} rule:", kind)).prompt() {
                Ok(entry) => entry,
                Err(_) => return Ok(()),
            };
            if entry.trim().is_empty() {
                println!("Empty entry ignored.");
                return Ok(());
            }
            add_rule(store, kind, &entry).await
        }
        _ => Ok(()),
    }
}

/// Interactive loop until the operator picks Exit.
///
/// Errors of one action are printed and the menu comes back; only prompt
/// failures end the session.
pub async fn run_menu<C: GmailClient>(
    orchestrator: &Orchestrator<C>,
    store: &RuleStore,
    reporter: &ProgressReporter,
) -> Result<()> {
    loop {
        let options = vec![MENU_ANALYZE, MENU_MOVE, MENU_RULES, MENU_CHECK, MENU_EXIT];
        let choice = match select("What would you like to do?", options)? {
            Some(choice) => choice,
            None => break,
        };

        let result = match choice {
            MENU_ANALYZE => {
                run_interruptible(|cancel| async move {
                    analyze(orchestrator, store, reporter, &cancel, false).await
                })
                .await
                .map(|_| ())
            }
            MENU_MOVE => {
                run_interruptible(|cancel| async move {
                    clean(orchestrator, store, reporter, &cancel, false).await
                })
                .await
                .map(|_| ())
            }
            MENU_RULES => manage_rules(store).await,
            MENU_CHECK => {
                run_interruptible(|cancel| async move { check(orchestrator, reporter, &cancel).await })
                    .await
            }
            _ => break,
        };

        if let Err(e) = result {
            warn!("Action failed: {}", e);
            println!("Error: {}", e);
        }
    }

    println!("Goodbye.");
    Ok(())
}
