//! Gmail Promotional Mail Cleaner
//!
//! Finds promotional messages among unread Gmail mail and moves them into a
//! dedicated folder by applying a label.
//!
//! # Overview
//!
//! - **Authentication**: OAuth2 installed flow with token caching
//! - **Metadata fetching**: batched header retrieval with backoff and pacing
//! - **Classification**: sender, subject and domain rule lists plus Gmail's
//!   promotions category
//! - **Labeling**: label lookup or creation, then batched bulk relabeling
//! - **Rules**: plain-text rule lists the operator can extend
//!
//! # Example Usage
//!
//! ```no_run
//! use gmail_cleaner::orchestrator::{Orchestrator, RunMode, SilentObserver};
//! use gmail_cleaner::{auth, client::ProductionGmailClient, config::Config, rules::RuleStore};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml".as_ref()).await?;
//!     let rules = RuleStore::new(&config.rules).load().await?;
//!
//!     let hub = auth::initialize_gmail_hub(
//!         "credentials.json".as_ref(),
//!         ".gmail-cleaner/token.json".as_ref(),
//!     )
//!     .await?;
//!     let client = ProductionGmailClient::new(hub, config.retry.request_timeout());
//!
//!     let orchestrator = Orchestrator::new(client, config);
//!     let report = orchestrator
//!         .run(RunMode::DryRun, &rules, &SilentObserver, &CancellationToken::new())
//!         .await?;
//!     println!("{}", report.summary_line());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - OAuth2 authentication and Gmail API initialization
//! - [`client`] - Gmail API trait and production client
//! - [`fetcher`] - Batched metadata retrieval
//! - [`classifier`] - Promotional predicate
//! - [`applier`] - Label resolution and batched relabeling
//! - [`orchestrator`] - Run stages, plans and reports
//! - [`retry`] - Bounded backoff loop, timeouts and cancellable pauses
//! - [`rules`] - Rule list files
//! - [`cli`] - Command-line interface and interactive console
//! - [`config`] - Configuration management
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures

pub mod applier;
pub mod auth;
pub mod classifier;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod orchestrator;
pub mod retry;
pub mod rules;

pub use error::{CleanerError, Result};

pub use models::{LabelInfo, MessageId, MessageMetadata, RuleKind, RuleSet};

pub use classifier::{MatchReason, PromoClassifier};

pub use config::{
    ClassificationConfig, CleanerConfig, Config, PacingConfig, RetryConfig, RulesConfig,
};

pub use client::{GmailClient, ProductionGmailClient, ProgressCallback};

pub use applier::{ApplyOutcome, LabelApplier};
pub use fetcher::{FetchOutcome, MetadataFetcher};
pub use orchestrator::{ClassificationPlan, Orchestrator, RunMode, RunObserver, RunReport};

pub use retry::{Attempt, RetryPolicy};

pub use rules::RuleStore;

// CLI types (for binary usage)
pub use cli::{Cli, Commands, ProgressReporter};
