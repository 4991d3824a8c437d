//! Unread listing, classification and relabeling as one forward pipeline
//!
//! A run moves through [`Stage`]s in order and never goes back. A dry run
//! stops after classification and hands back a [`ClassificationPlan`]; the
//! plan can later be committed without fetching or classifying again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::applier::LabelApplier;
use crate::classifier::{MatchReason, PromoClassifier};
use crate::client::{GmailClient, ProgressCallback};
use crate::config::Config;
use crate::error::{CleanerError, Result};
use crate::fetcher::MetadataFetcher;
use crate::models::{MessageId, RuleSet};
use crate::retry::with_retry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    DryRun,
    Commit,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::DryRun => write!(f, "dry run"),
            RunMode::Commit => write!(f, "commit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ListUnread,
    FetchMetadata,
    Classify,
    ApplyLabel,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ListUnread => "list unread",
            Stage::FetchMetadata => "fetch metadata",
            Stage::Classify => "classify",
            Stage::ApplyLabel => "apply label",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Receives stage boundaries and hands out a progress sink per stage
pub trait RunObserver: Send + Sync {
    /// Called when a batched stage starts with the number of ids it covers
    fn stage_started(&self, stage: Stage, total: u64) -> ProgressCallback;

    fn stage_finished(&self, _stage: Stage) {}
}

/// Observer that ignores everything
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn stage_started(&self, _stage: Stage, _total: u64) -> ProgressCallback {
        Arc::new(|_| {})
    }
}

/// One message the plan would move
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub id: MessageId,
    pub sender: String,
    pub subject: String,
    pub reason: MatchReason,
}

/// Result of the read-only stages of a run
#[derive(Debug, Clone)]
pub struct ClassificationPlan {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub label_name: String,
    /// Unread ids outside the target label
    pub total: usize,
    /// Promotional ids, in listing order
    pub promotional: Vec<MessageId>,
    pub moves: Vec<PlannedMove>,
    pub kept: usize,
    /// Ids whose metadata could not be fetched; never labeled
    pub unknown: usize,
    pub fetch_failed_batches: usize,
    started: Instant,
}

impl ClassificationPlan {
    fn empty(label_name: &str) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            label_name: label_name.to_string(),
            total: 0,
            promotional: Vec::new(),
            moves: Vec::new(),
            kept: 0,
            unknown: 0,
            fetch_failed_batches: 0,
            started: Instant::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Report of the plan as a dry run, with nothing labeled
    pub fn dry_run_report(&self) -> RunReport {
        RunReport::from_plan(self, RunMode::DryRun)
    }
}

/// Run-level summary
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub label_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub promotional: usize,
    pub kept: usize,
    pub unknown: usize,
    pub fetch_failed_batches: usize,
    pub labeled: usize,
    pub label_failed: usize,
    pub label_failed_batches: usize,
    pub duration: Duration,
}

impl RunReport {
    fn from_plan(plan: &ClassificationPlan, mode: RunMode) -> Self {
        Self {
            run_id: plan.run_id.clone(),
            mode,
            label_name: plan.label_name.clone(),
            started_at: plan.started_at,
            completed_at: Utc::now(),
            total: plan.total,
            promotional: plan.promotional.len(),
            kept: plan.kept,
            unknown: plan.unknown,
            fetch_failed_batches: plan.fetch_failed_batches,
            labeled: 0,
            label_failed: 0,
            label_failed_batches: 0,
            duration: plan.started.elapsed(),
        }
    }

    /// Any batch failed or any message went unclassified
    pub fn has_failures(&self) -> bool {
        self.fetch_failed_batches > 0 || self.unknown > 0 || self.label_failed_batches > 0
    }

    pub fn summary_line(&self) -> String {
        if self.total == 0 {
            return format!("Nothing to do: no unread messages outside '{}'", self.label_name);
        }

        let mut line = format!(
            "{} unread, {} promotional, {} kept",
            self.total, self.promotional, self.kept
        );
        if self.unknown > 0 {
            line.push_str(&format!(", {} without metadata", self.unknown));
        }
        match self.mode {
            RunMode::DryRun => {
                line.push_str(&format!(" ({} to label '{}')", self.promotional, self.label_name))
            }
            RunMode::Commit => {
                line.push_str(&format!(", {} labeled '{}'", self.labeled, self.label_name));
                if self.label_failed > 0 {
                    line.push_str(&format!(
                        ", {} not labeled ({} failed batches)",
                        self.label_failed, self.label_failed_batches
                    ));
                }
            }
        }
        if self.has_failures() {
            line.push_str(" [incomplete]");
        }
        line
    }

    /// Markdown rendering of the report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        match self.mode {
            RunMode::DryRun => md.push_str("# Promotional Mail Report (DRY RUN)\n\n"),
            RunMode::Commit => md.push_str("# Promotional Mail Report\n\n"),
        }
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!("- **Target folder:** {}\n", self.label_name));
        md.push_str(&format!("- **Unread messages:** {}\n", self.total));
        md.push_str(&format!("- **Promotional:** {}\n", self.promotional));
        md.push_str(&format!("- **Kept:** {}\n", self.kept));
        md.push_str(&format!("- **Without metadata:** {}\n", self.unknown));
        if self.mode == RunMode::Commit {
            md.push_str(&format!("- **Labeled:** {}\n", self.labeled));
            md.push_str(&format!("- **Not labeled:** {}\n", self.label_failed));
        }
        md.push_str(&format!(
            "- **Processing time:** {:.1} seconds\n",
            self.duration.as_secs_f64()
        ));

        if self.has_failures() {
            md.push_str("\n## Failures\n\n");
            md.push_str(&format!(
                "- Metadata batches failed: {}\n",
                self.fetch_failed_batches
            ));
            md.push_str(&format!(
                "- Label batches failed: {}\n",
                self.label_failed_batches
            ));
        }

        md
    }

    /// Save report to file, as JSON for a `.json` path and Markdown otherwise
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self).map_err(|e| {
                CleanerError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
            })?
        } else {
            self.to_markdown()
        };
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Label count and round-trip time of a connection check
#[derive(Debug, Clone)]
pub struct ConnectionReport {
    pub labels: usize,
    pub latency: Duration,
}

pub struct Orchestrator<C: GmailClient> {
    client: C,
    config: Config,
    classifier: PromoClassifier,
}

impl<C: GmailClient> Orchestrator<C> {
    pub fn new(client: C, config: Config) -> Self {
        let classifier = PromoClassifier::new(&config.classification);
        Self {
            client,
            config,
            classifier,
        }
    }

    /// Run the read-only stages: list, fetch, classify.
    ///
    /// Listing failures and a metadata stage where every batch failed abort
    /// the plan; nothing has been mutated at that point.
    pub async fn plan(
        &self,
        rules: &RuleSet,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> Result<ClassificationPlan> {
        let label_name = self.config.cleaner.target_folder.as_str();
        let mut plan = ClassificationPlan::empty(label_name);
        info!("Run {} started ({} rules loaded)", plan.run_id, rules.len());

        debug!("Stage: {}", Stage::ListUnread);
        let ids = with_retry("list unread", &self.config.retry.policy(), cancel, || {
            self.client
                .list_unread_ids(label_name, self.config.cleaner.max_messages)
        })
        .await?;
        observer.stage_finished(Stage::ListUnread);

        plan.total = ids.len();
        if ids.is_empty() {
            info!("No unread messages outside '{}'", label_name);
            return Ok(plan);
        }
        info!("Found {} unread messages outside '{}'", ids.len(), label_name);

        debug!("Stage: {}", Stage::FetchMetadata);
        let progress = observer.stage_started(Stage::FetchMetadata, ids.len() as u64);
        let fetched = MetadataFetcher::new(&self.client, &self.config)
            .fetch_all(&ids, &progress, cancel)
            .await?;
        observer.stage_finished(Stage::FetchMetadata);

        if fetched.metadata.is_empty() && fetched.failed_batches > 0 {
            return Err(CleanerError::ApiError(format!(
                "Metadata stage failed: all {} batches failed",
                fetched.failed_batches
            )));
        }
        plan.fetch_failed_batches = fetched.failed_batches;

        debug!("Stage: {}", Stage::Classify);
        for id in &ids {
            let Some(meta) = fetched.get(id) else {
                plan.unknown += 1;
                continue;
            };
            match self.classifier.explain(meta, rules) {
                Some(reason) => {
                    debug!("{} is promotional: {}", id, reason);
                    plan.promotional.push(id.clone());
                    plan.moves.push(PlannedMove {
                        id: id.clone(),
                        sender: meta.sender.clone(),
                        subject: meta.subject.clone(),
                        reason,
                    });
                }
                None => plan.kept += 1,
            }
        }
        observer.stage_finished(Stage::Classify);

        info!(
            "Classified {} messages: {} promotional, {} kept, {} unknown",
            plan.total,
            plan.promotional.len(),
            plan.kept,
            plan.unknown
        );
        Ok(plan)
    }

    /// Label the plan's promotional messages.
    ///
    /// Label resolution failure and cancellation are errors; failed batches
    /// are reported in the returned summary.
    pub async fn commit(
        &self,
        plan: &ClassificationPlan,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let mut report = RunReport::from_plan(plan, RunMode::Commit);
        if plan.promotional.is_empty() {
            info!("No promotional messages to move");
            return Ok(report);
        }

        debug!("Stage: {}", Stage::ApplyLabel);
        let progress = observer.stage_started(Stage::ApplyLabel, plan.promotional.len() as u64);
        let outcome = LabelApplier::new(&self.client, &self.config)
            .apply_label(&plan.promotional, &plan.label_name, &progress, cancel)
            .await?;
        observer.stage_finished(Stage::ApplyLabel);

        report.labeled = outcome.labeled;
        report.label_failed = outcome.failed;
        report.label_failed_batches = outcome.failed_batches;
        report.completed_at = Utc::now();
        report.duration = plan.started.elapsed();

        if report.has_failures() {
            warn!("Run {} finished with failures: {}", report.run_id, report.summary_line());
        } else {
            info!("Run {} finished: {}", report.run_id, report.summary_line());
        }
        Ok(report)
    }

    /// Plan, then commit unless `mode` is a dry run
    pub async fn run(
        &self,
        mode: RunMode,
        rules: &RuleSet,
        observer: &dyn RunObserver,
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        let plan = self.plan(rules, observer, cancel).await?;
        let report = match mode {
            RunMode::DryRun => plan.dry_run_report(),
            RunMode::Commit => self.commit(&plan, observer, cancel).await?,
        };
        observer.stage_finished(Stage::Report);
        Ok(report)
    }

    /// List labels once to prove credentials and connectivity
    pub async fn check_connection(&self, cancel: &CancellationToken) -> Result<ConnectionReport> {
        let started = Instant::now();
        let labels = with_retry("list_labels", &self.config.retry.policy(), cancel, || {
            self.client.list_labels()
        })
        .await?;
        let latency = started.elapsed();
        info!("Connection OK: {} labels in {:?}", labels.len(), latency);
        Ok(ConnectionReport {
            labels: labels.len(),
            latency,
        })
    }
}
