//! Resolve the target label and apply it to messages in batches

use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{GmailClient, ProgressCallback};
use crate::config::{Config, PacingConfig};
use crate::error::{CleanerError, Result};
use crate::models::{LabelInfo, MessageId};
use crate::retry::{pause, with_retry, RetryPolicy};

/// What one [`LabelApplier::apply_label`] call did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Resolved label, `None` when there was nothing to label
    pub label: Option<LabelInfo>,
    /// Ids handed to the applier
    pub requested: usize,
    pub batches: usize,
    pub failed_batches: usize,
    /// Ids covered by acknowledged batch calls
    pub labeled: usize,
    /// Ids of batches whose call failed
    pub failed: usize,
}

impl ApplyOutcome {
    /// Every requested id went through a batch call. Says nothing about the
    /// calls succeeding; see `failed_batches` for that.
    pub fn acknowledged(&self) -> bool {
        self.labeled + self.failed == self.requested
    }

    pub fn is_complete(&self) -> bool {
        self.acknowledged() && self.failed_batches == 0
    }
}

pub struct LabelApplier<'a, C: GmailClient + ?Sized> {
    client: &'a C,
    batch_size: usize,
    retry: RetryPolicy,
    pacing: PacingConfig,
}

impl<'a, C: GmailClient + ?Sized> LabelApplier<'a, C> {
    pub fn new(client: &'a C, config: &Config) -> Self {
        Self {
            client,
            batch_size: config.cleaner.batch_size.max(1),
            retry: config.retry.policy(),
            pacing: config.pacing.clone(),
        }
    }

    /// Look `name` up among existing labels (exact, case-sensitive), creating
    /// it when absent. A failed lookup still falls through to creation; only
    /// both failing is an error.
    pub async fn resolve_label(&self, name: &str, cancel: &CancellationToken) -> Result<LabelInfo> {
        let lookup = with_retry("list_labels", &self.retry, cancel, || self.client.list_labels()).await;

        let lookup_error = match lookup {
            Ok(labels) => {
                if let Some(label) = labels.into_iter().find(|l| l.name == name) {
                    debug!("Found existing label '{}' ({})", label.name, label.id);
                    return Ok(label);
                }
                None
            }
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("Failed to list labels, trying to create '{}': {}", name, e);
                Some(e)
            }
        };

        match with_retry("create_label", &self.retry, cancel, || self.client.create_label(name)).await
        {
            Ok(id) => {
                info!("Label '{}' created ({})", name, id);
                Ok(LabelInfo {
                    id,
                    name: name.to_string(),
                })
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => Err(CleanerError::LabelError(match lookup_error {
                Some(lookup) => format!(
                    "Label '{}' could not be found ({}) or created ({})",
                    name, lookup, e
                ),
                None => format!("Label '{}' could not be created: {}", name, e),
            })),
        }
    }

    /// Apply `label_name` to every id, one batch at a time.
    ///
    /// `Err` only for label resolution failure or cancellation; failed batches
    /// are logged, counted and skipped. Progress always advances by the batch
    /// length so a bar reaches 100% even when batches failed.
    pub async fn apply_label(
        &self,
        ids: &[MessageId],
        label_name: &str,
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<ApplyOutcome> {
        if ids.is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let label = self.resolve_label(label_name, cancel).await?;
        let batch_count = (ids.len() + self.batch_size - 1) / self.batch_size;
        let mut outcome = ApplyOutcome {
            label: Some(label.clone()),
            requested: ids.len(),
            ..Default::default()
        };

        info!(
            "Applying label '{}' to {} messages in {} batches",
            label.name,
            ids.len(),
            batch_count
        );

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            let operation = format!("label batch {}/{}", index + 1, batch_count);

            let result = with_retry(&operation, &self.retry, cancel, || {
                self.client.batch_add_label(chunk, &label.id)
            })
            .await;

            outcome.batches += 1;
            match result {
                Ok(()) => {
                    debug!("{} labeled {} messages", operation, chunk.len());
                    outcome.labeled += chunk.len();
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("Error applying label in {}: {}", operation, e);
                    outcome.failed_batches += 1;
                    outcome.failed += chunk.len();
                }
            }

            on_progress(chunk.len() as u64);

            if index + 1 < batch_count {
                pause(self.apply_delay(), cancel).await?;
            }
        }

        if outcome.failed_batches > 0 {
            warn!(
                "{} of {} label batches failed ({} messages left unlabeled)",
                outcome.failed_batches, outcome.batches, outcome.failed
            );
        }

        Ok(outcome)
    }

    /// Uniform jitter in `[apply_min_ms, apply_max_ms]`
    fn apply_delay(&self) -> Duration {
        let (min, max) = (self.pacing.apply_min_ms, self.pacing.apply_max_ms);
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}
