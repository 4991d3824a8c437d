//! Common test utilities and fixtures

#![allow(dead_code)]

use async_trait::async_trait;
use gmail_cleaner::client::{GmailClient, MetadataBatch};
use gmail_cleaner::config::{Config, PacingConfig};
use gmail_cleaner::error::{CleanerError, Result};
use gmail_cleaner::models::{LabelInfo, MessageId, MessageMetadata, RuleSet};
use gmail_cleaner::ProgressCallback;
use mockall::mock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub const TARGET: &str = "GmailCleaner";

/// Create a test message with the given headers and label ids
pub fn create_test_message(id: &str, sender: &str, subject: &str, labels: &[&str]) -> MessageMetadata {
    MessageMetadata {
        id: id.to_string(),
        sender: sender.to_string(),
        subject: subject.to_string(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
    }
}

/// Plain inbox messages `m0..m{n-1}` that no rule matches
pub fn create_plain_messages(n: usize) -> Vec<MessageMetadata> {
    (0..n)
        .map(|i| {
            create_test_message(
                &format!("m{}", i),
                "colleague@work.example",
                "Meeting notes",
                &["INBOX", "UNREAD"],
            )
        })
        .collect()
}

pub fn ids(messages: &[MessageMetadata]) -> Vec<MessageId> {
    messages.iter().map(|m| m.id.clone()).collect()
}

pub fn rules(senders: &[&str], subjects: &[&str], domains: &[&str]) -> RuleSet {
    let owned = |list: &[&str]| list.iter().map(|s| s.to_string()).collect();
    RuleSet {
        senders: owned(senders),
        subjects: owned(subjects),
        domains: owned(domains),
    }
}

/// Three unread messages: a matches a domain rule, b is personal mail and c
/// carries Gmail's promotions category
pub fn three_message_inbox() -> (Vec<MessageMetadata>, RuleSet) {
    let messages = vec![
        create_test_message(
            "a",
            "Marketplace <marketplace@mail.notion.so>",
            "Your template",
            &["INBOX", "UNREAD"],
        ),
        create_test_message(
            "b",
            "Alice <alice@example.org>",
            "Lunch tomorrow?",
            &["INBOX", "UNREAD"],
        ),
        create_test_message(
            "c",
            "Shop <news@shop.example>",
            "New arrivals",
            &["INBOX", "UNREAD", "CATEGORY_PROMOTIONS"],
        ),
    ];
    (messages, rules(&[], &[], &["notion.so"]))
}

/// Three unread messages: a matches the `deals@` sender rule, b is personal
/// mail and c carries Gmail's promotions category
pub fn deals_inbox() -> (Vec<MessageMetadata>, RuleSet) {
    let messages = vec![
        create_test_message("a", "deals@shop.com", "50% off today", &["INBOX", "UNREAD"]),
        create_test_message("b", "friend@gmail.com", "Dinner plans", &["INBOX", "UNREAD"]),
        create_test_message("c", "x@y.com", "Hi", &["CATEGORY_PROMOTIONS"]),
    ];
    (messages, rules(&["deals@"], &[], &[]))
}

/// Default config without pacing sleeps and with a small batch size
pub fn test_config(batch_size: usize) -> Config {
    let mut config = Config::default();
    config.cleaner.batch_size = batch_size;
    config.pacing = PacingConfig::disabled();
    config.retry.max_jitter_ms = 0;
    config
}

/// Progress sink that sums what it was given
pub fn counting_progress() -> (ProgressCallback, Arc<AtomicU64>) {
    let counter = Arc::new(AtomicU64::new(0));
    let sink = Arc::clone(&counter);
    let callback: ProgressCallback = Arc::new(move |n| {
        sink.fetch_add(n, Ordering::SeqCst);
    });
    (callback, counter)
}

pub fn rate_limited() -> CleanerError {
    CleanerError::RateLimitExceeded { retry_after: 1 }
}

pub fn server_error() -> CleanerError {
    CleanerError::ServerError {
        status: 500,
        message: "backend error".to_string(),
    }
}

// Mock implementation of GmailClient for testing
mock! {
    pub GmailClient {}

    #[async_trait::async_trait]
    impl GmailClient for GmailClient {
        async fn list_unread_ids(
            &self,
            exclude_label: &str,
            max_results: Option<usize>,
        ) -> Result<Vec<MessageId>>;
        async fn get_metadata_batch(&self, ids: &[MessageId]) -> Result<MetadataBatch>;
        async fn list_labels(&self) -> Result<Vec<LabelInfo>>;
        async fn create_label(&self, name: &str) -> Result<String>;
        async fn batch_add_label(&self, ids: &[MessageId], label_id: &str) -> Result<()>;
    }
}

/// Calls a [`FakeGmail`] has served
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CallLog {
    pub list_unread: usize,
    pub metadata_batches: Vec<Vec<MessageId>>,
    pub list_labels: usize,
    pub create_label: Vec<String>,
    pub add_label_batches: Vec<(Vec<MessageId>, String)>,
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub messages: Vec<MessageMetadata>,
    pub labels: Vec<LabelInfo>,
    pub calls: CallLog,
    /// Next metadata calls answered with HTTP 429
    pub rate_limit_fetches: usize,
    /// Next label calls answered with HTTP 429
    pub rate_limit_labels: usize,
    /// Metadata batches starting with one of these ids fail with HTTP 500
    pub fail_fetch_from: HashSet<MessageId>,
    /// Label batches starting with one of these ids fail with HTTP 500
    pub fail_label_from: HashSet<MessageId>,
    /// Ids whose metadata sub-request answers 404
    pub missing: HashSet<MessageId>,
    /// Remaining times the metadata sub-request for an id answers HTTP 429
    pub throttled: HashMap<MessageId, usize>,
    pub fail_list_unread: bool,
    pub fail_list_labels: bool,
    pub fail_create_label: bool,
}

/// In-memory mailbox: every message is unread, labels added by
/// `batch_add_label` stick, and listing honors the excluded label
#[derive(Debug, Default)]
pub struct FakeGmail {
    state: Mutex<FakeState>,
}

impl FakeGmail {
    pub fn new(messages: Vec<MessageMetadata>) -> Self {
        Self {
            state: Mutex::new(FakeState {
                messages,
                labels: vec![
                    LabelInfo {
                        id: "INBOX".to_string(),
                        name: "INBOX".to_string(),
                    },
                    LabelInfo {
                        id: "CATEGORY_PROMOTIONS".to_string(),
                        name: "CATEGORY_PROMOTIONS".to_string(),
                    },
                ],
                ..Default::default()
            }),
        }
    }

    pub fn with_label(self, id: &str, name: &str) -> Self {
        self.state().labels.push(LabelInfo {
            id: id.to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn calls(&self) -> CallLog {
        self.state().calls.clone()
    }

    /// Ids of messages currently carrying `label_id`
    pub fn labeled_with(&self, label_id: &str) -> Vec<MessageId> {
        self.state()
            .messages
            .iter()
            .filter(|m| m.labels.contains(label_id))
            .map(|m| m.id.clone())
            .collect()
    }
}

#[async_trait]
impl GmailClient for FakeGmail {
    async fn list_unread_ids(
        &self,
        exclude_label: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<MessageId>> {
        let mut state = self.state();
        state.calls.list_unread += 1;
        if state.fail_list_unread {
            return Err(server_error());
        }

        let excluded = state
            .labels
            .iter()
            .find(|l| l.name == exclude_label)
            .map(|l| l.id.clone());

        let mut found: Vec<MessageId> = state
            .messages
            .iter()
            .filter(|m| excluded.as_ref().map_or(true, |id| !m.labels.contains(id)))
            .map(|m| m.id.clone())
            .collect();
        if let Some(limit) = max_results {
            found.truncate(limit);
        }
        Ok(found)
    }

    async fn get_metadata_batch(&self, ids: &[MessageId]) -> Result<MetadataBatch> {
        let mut state = self.state();
        state.calls.metadata_batches.push(ids.to_vec());

        if state.rate_limit_fetches > 0 {
            state.rate_limit_fetches -= 1;
            return Err(rate_limited());
        }
        if ids.first().is_some_and(|id| state.fail_fetch_from.contains(id)) {
            return Err(server_error());
        }

        let mut batch = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(remaining) = state.throttled.get_mut(id).filter(|n| **n > 0) {
                *remaining -= 1;
                batch.push((id.clone(), Err(rate_limited())));
                continue;
            }
            let found = state
                .messages
                .iter()
                .find(|m| &m.id == id)
                .filter(|_| !state.missing.contains(id))
                .cloned()
                .ok_or_else(|| CleanerError::NotFound(id.clone()));
            batch.push((id.clone(), found));
        }
        Ok(batch)
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let mut state = self.state();
        state.calls.list_labels += 1;
        if state.fail_list_labels {
            return Err(server_error());
        }
        Ok(state.labels.clone())
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let mut state = self.state();
        state.calls.create_label.push(name.to_string());
        if state.fail_create_label {
            return Err(CleanerError::BadRequest("label rejected".to_string()));
        }
        let id = format!("Label_{}", state.labels.len() + 1);
        state.labels.push(LabelInfo {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn batch_add_label(&self, ids: &[MessageId], label_id: &str) -> Result<()> {
        let mut state = self.state();
        state
            .calls
            .add_label_batches
            .push((ids.to_vec(), label_id.to_string()));

        if state.rate_limit_labels > 0 {
            state.rate_limit_labels -= 1;
            return Err(rate_limited());
        }
        if ids.first().is_some_and(|id| state.fail_label_from.contains(id)) {
            return Err(server_error());
        }

        for message in state.messages.iter_mut().filter(|m| ids.contains(&m.id)) {
            message.labels.insert(label_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_test_message() {
        let msg = create_test_message("msg1", "test@example.com", "Test Subject", &["INBOX"]);
        assert_eq!(msg.id, "msg1");
        assert_eq!(msg.sender_domain(), "example.com");
        assert!(msg.labels.contains("INBOX"));
    }

    #[test]
    fn test_test_config_has_no_pacing() {
        let config = test_config(2);
        assert_eq!(config.cleaner.batch_size, 2);
        assert_eq!(config.pacing, PacingConfig::disabled());
        assert!(config.validate().is_ok());
    }
}
