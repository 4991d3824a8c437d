//! Rule lists persisted as plain text, one entry per line
//!
//! Files (and their parent directories) are created empty on first read.
//! Blank lines are ignored; entries are kept in file order.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::RulesConfig;
use crate::error::{CleanerError, Result};
use crate::models::{RuleKind, RuleSet};

/// Read one rule file, creating it when absent
pub async fn read_rules(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        ensure_parent(path).await?;
        tokio::fs::write(path, "").await.map_err(|e| {
            CleanerError::RuleStoreError(format!("Failed to create {:?}: {}", path, e))
        })?;
        info!("Created empty rule file {:?}", path);
        return Ok(Vec::new());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CleanerError::RuleStoreError(format!("Failed to read {:?}: {}", path, e)))?;

    Ok(parse_rules(&content))
}

/// Append one entry on its own line
pub async fn append_rule(path: &Path, entry: &str) -> Result<()> {
    let entry = entry.trim();
    if entry.is_empty() || entry.contains('\n') {
        return Err(CleanerError::RuleStoreError(
            "Rule entries must be a single non-empty line".to_string(),
        ));
    }

    ensure_parent(path).await?;

    let needs_newline = match tokio::fs::read(path).await {
        Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
        Err(_) => false,
    };

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| CleanerError::RuleStoreError(format!("Failed to open {:?}: {}", path, e)))?;

    let line = if needs_newline {
        format!("\n{}\n", entry)
    } else {
        format!("{}\n", entry)
    };
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;

    debug!("Appended rule '{}' to {:?}", entry, path);
    Ok(())
}

fn parse_rules(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// The three rule files of one installation
#[derive(Debug, Clone)]
pub struct RuleStore {
    senders: PathBuf,
    subjects: PathBuf,
    domains: PathBuf,
}

impl RuleStore {
    pub fn new(config: &RulesConfig) -> Self {
        Self {
            senders: config.senders_file.clone(),
            subjects: config.subjects_file.clone(),
            domains: config.domains_file.clone(),
        }
    }

    pub fn path(&self, kind: RuleKind) -> &Path {
        match kind {
            RuleKind::Sender => &self.senders,
            RuleKind::Subject => &self.subjects,
            RuleKind::Domain => &self.domains,
        }
    }

    /// Read all three lists fresh from disk
    pub async fn load(&self) -> Result<RuleSet> {
        let rules = RuleSet {
            senders: read_rules(&self.senders).await?,
            subjects: read_rules(&self.subjects).await?,
            domains: read_rules(&self.domains).await?,
        };
        debug!(
            "Loaded {} sender, {} subject and {} domain rules",
            rules.senders.len(),
            rules.subjects.len(),
            rules.domains.len()
        );
        Ok(rules)
    }

    pub async fn list(&self, kind: RuleKind) -> Result<Vec<String>> {
        read_rules(self.path(kind)).await
    }

    pub async fn add(&self, kind: RuleKind, entry: &str) -> Result<()> {
        append_rule(self.path(kind), entry).await
    }
}
