//! Gmail API access behind a trait so the pipeline can be driven by mocks

use async_trait::async_trait;
use google_gmail1::api::{BatchModifyMessagesRequest, Label, Message};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::{GmailHub, MODIFY_SCOPE};
use crate::error::{CleanerError, Result};
use crate::models::{LabelInfo, MessageId, MessageMetadata};
use crate::retry::with_timeout;

/// Progress callback type for batch operations, called with the number of
/// ids a finished batch covered
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Per-id result of a metadata batch
pub type MetadataBatch = Vec<(MessageId, Result<MessageMetadata>)>;

/// Characters Gmail's search syntax folds into `-` inside label names
static LABEL_QUERY_SEPARATORS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\s/&()]+").unwrap());

/// Remote operations the cleaning pipeline depends on
#[async_trait]
pub trait GmailClient: Send + Sync {
    /// Ids of unread messages that do not already carry `exclude_label`
    async fn list_unread_ids(
        &self,
        exclude_label: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<MessageId>>;

    /// Metadata (From, Subject, label ids) for one batch of ids.
    ///
    /// `Err` means the call as a whole failed; per-id failures are reported
    /// inside the batch. A rate-limited per-id error asks the caller to
    /// resubmit that id.
    async fn get_metadata_batch(&self, ids: &[MessageId]) -> Result<MetadataBatch>;

    /// List all labels in the account
    async fn list_labels(&self) -> Result<Vec<LabelInfo>>;

    /// Create a new label, returning its id
    async fn create_label(&self, name: &str) -> Result<String>;

    /// Add a label to every id of one batch in a single call
    async fn batch_add_label(&self, ids: &[MessageId], label_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: GmailClient + ?Sized> GmailClient for Arc<T> {
    async fn list_unread_ids(
        &self,
        exclude_label: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<MessageId>> {
        self.as_ref().list_unread_ids(exclude_label, max_results).await
    }

    async fn get_metadata_batch(&self, ids: &[MessageId]) -> Result<MetadataBatch> {
        self.as_ref().get_metadata_batch(ids).await
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        self.as_ref().list_labels().await
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        self.as_ref().create_label(name).await
    }

    async fn batch_add_label(&self, ids: &[MessageId], label_id: &str) -> Result<()> {
        self.as_ref().batch_add_label(ids, label_id).await
    }
}

/// Gmail search query for unread mail outside `label_name`
pub fn unread_query(label_name: &str) -> String {
    let folded = LABEL_QUERY_SEPARATORS
        .replace_all(label_name.trim(), "-")
        .to_lowercase();
    format!("is:unread -label:{}", folded)
}

/// Production Gmail client. Issues one request at a time; retry and pacing
/// live in the pipeline, this type only bounds each request by a timeout.
pub struct ProductionGmailClient {
    hub: GmailHub,
    request_timeout: Duration,
}

impl ProductionGmailClient {
    pub fn new(hub: GmailHub, request_timeout: Duration) -> Self {
        Self {
            hub,
            request_timeout,
        }
    }

    async fn get_metadata(&self, id: &str) -> Result<MessageMetadata> {
        let call = async {
            let (_, msg) = self
                .hub
                .users()
                .messages_get("me", id)
                .format("metadata")
                .add_metadata_headers("From")
                .add_metadata_headers("Subject")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            parse_message_metadata(msg)
        };
        with_timeout(self.request_timeout, call).await
    }
}

/// Turn a Gmail API message into [`MessageMetadata`].
///
/// This is the only place message payloads are inspected. Missing headers
/// become empty strings; a missing id is the only hard failure.
pub fn parse_message_metadata(msg: Message) -> Result<MessageMetadata> {
    let id = msg
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CleanerError::InvalidMessageFormat("Missing message ID".to_string()))?;

    let labels: BTreeSet<String> = msg.label_ids.unwrap_or_default().into_iter().collect();

    let mut sender = String::new();
    let mut subject = String::new();

    let headers = msg
        .payload
        .and_then(|p| p.headers)
        .unwrap_or_default();

    for header in headers {
        if let (Some(name), Some(value)) = (header.name, header.value) {
            match name.to_lowercase().as_str() {
                "from" if sender.is_empty() => sender = value,
                "subject" if subject.is_empty() => subject = value,
                _ => {}
            }
        }
    }

    Ok(MessageMetadata {
        id,
        sender,
        subject,
        labels,
    })
}

#[async_trait]
impl GmailClient for ProductionGmailClient {
    async fn list_unread_ids(
        &self,
        exclude_label: &str,
        max_results: Option<usize>,
    ) -> Result<Vec<MessageId>> {
        let query = unread_query(exclude_label);
        debug!("Listing messages with query: {}", query);

        if max_results == Some(0) {
            return Ok(Vec::new());
        }

        let mut all_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_size = match max_results {
                Some(limit) => (limit - all_ids.len()).min(500) as u32,
                None => 500,
            };

            let mut call = self
                .hub
                .users()
                .messages_list("me")
                .q(&query)
                .max_results(page_size);

            if let Some(token) = page_token.as_ref() {
                call = call.page_token(token);
            }

            let (_, response) = with_timeout(self.request_timeout, async {
                Ok(call.add_scope(MODIFY_SCOPE).doit().await?)
            })
            .await?;

            all_ids.extend(
                response
                    .messages
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(|m| m.id),
            );

            page_token = response.next_page_token;
            let limit_reached = max_results.is_some_and(|limit| all_ids.len() >= limit);
            if page_token.is_none() || limit_reached {
                break;
            }
        }

        if let Some(limit) = max_results {
            all_ids.truncate(limit);
        }
        Ok(all_ids)
    }

    async fn get_metadata_batch(&self, ids: &[MessageId]) -> Result<MetadataBatch> {
        let mut batch = Vec::with_capacity(ids.len());

        for id in ids {
            match self.get_metadata(id).await {
                // Throttled ids are handed back for the caller to resubmit
                Err(e) if e.is_rate_limited() => {
                    debug!("Metadata request for {} throttled: {}", id, e);
                    batch.push((id.clone(), Err(e)));
                }
                Err(e) => {
                    warn!("Failed to get metadata for {}: {}", id, e);
                    batch.push((id.clone(), Err(e)));
                }
                Ok(meta) => batch.push((id.clone(), Ok(meta))),
            }
        }

        Ok(batch)
    }

    async fn list_labels(&self) -> Result<Vec<LabelInfo>> {
        let api_call = async {
            debug!("Calling Gmail API to list labels...");
            Ok(self
                .hub
                .users()
                .labels_list("me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?)
        };

        let (_, response) = with_timeout(self.request_timeout, api_call).await?;

        let labels: Vec<LabelInfo> = response
            .labels
            .unwrap_or_default()
            .into_iter()
            .filter_map(|label| match (label.id, label.name) {
                (Some(id), Some(name)) => Some(LabelInfo { id, name }),
                _ => None,
            })
            .collect();

        debug!("Successfully parsed {} labels", labels.len());
        Ok(labels)
    }

    async fn create_label(&self, name: &str) -> Result<String> {
        let label = Label {
            name: Some(name.to_string()),
            message_list_visibility: Some("show".to_string()),
            label_list_visibility: Some("labelShow".to_string()),
            ..Default::default()
        };

        let (_, created_label) = with_timeout(self.request_timeout, async {
            Ok(self
                .hub
                .users()
                .labels_create(label, "me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?)
        })
        .await?;

        created_label
            .id
            .ok_or_else(|| CleanerError::LabelError("Created label has no ID".to_string()))
    }

    async fn batch_add_label(&self, ids: &[MessageId], label_id: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let request = BatchModifyMessagesRequest {
            ids: Some(ids.to_vec()),
            add_label_ids: Some(vec![label_id.to_string()]),
            remove_label_ids: None,
        };

        with_timeout(self.request_timeout, async {
            self.hub
                .users()
                .messages_batch_modify(request, "me")
                .add_scope(MODIFY_SCOPE)
                .doit()
                .await?;
            Ok(())
        })
        .await
    }
}
