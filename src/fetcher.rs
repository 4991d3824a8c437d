//! Batched metadata retrieval with backoff and adaptive pacing

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{GmailClient, ProgressCallback};
use crate::config::{Config, PacingConfig};
use crate::error::{CleanerError, Result};
use crate::models::{MessageId, MessageMetadata};
use crate::retry::{pause, with_retry, RetryPolicy};

/// Metadata gathered by one [`MetadataFetcher::fetch_all`] pass
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub metadata: HashMap<MessageId, MessageMetadata>,
    /// Batches whose call failed outright (exhausted retries or permanent error)
    pub failed_batches: usize,
    /// Ids missing from `metadata`, whether their whole batch or only their
    /// sub-request failed
    pub missing: usize,
}

/// Where one batch stands between attempts
#[derive(Debug, Default)]
struct ChunkState {
    /// Ids still to fetch: the whole batch, or the throttled remainder
    pending: Vec<MessageId>,
    fetched: Vec<MessageMetadata>,
    /// The last attempt failed as a call rather than per id
    call_failed: bool,
    /// Why `pending` is not empty once the retry budget is spent
    error: Option<CleanerError>,
}

fn lock(state: &Mutex<ChunkState>) -> MutexGuard<'_, ChunkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MetadataFetcher<'a, C: GmailClient + ?Sized> {
    client: &'a C,
    batch_size: usize,
    retry: RetryPolicy,
    pacing: PacingConfig,
}

impl<'a, C: GmailClient + ?Sized> MetadataFetcher<'a, C> {
    pub fn new(client: &'a C, config: &Config) -> Self {
        Self {
            client,
            batch_size: config.cleaner.batch_size.max(1),
            retry: config.retry.policy(),
            pacing: config.pacing.clone(),
        }
    }

    /// Fetch metadata for every id, one batch at a time.
    ///
    /// A failed batch is logged and its ids are left out of the result. A
    /// sub-request that stays throttled drops only its own id. Only
    /// cancellation stops the pass early.
    pub async fn fetch_all(
        &self,
        ids: &[MessageId],
        on_progress: &ProgressCallback,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let total = ids.len();
        let batch_count = (total + self.batch_size - 1) / self.batch_size;
        let mut outcome = FetchOutcome {
            metadata: HashMap::with_capacity(total),
            ..Default::default()
        };

        info!(
            "Fetching metadata for {} messages in {} batches",
            total, batch_count
        );

        for (index, chunk) in ids.chunks(self.batch_size).enumerate() {
            let offset = index * self.batch_size;
            let operation = format!("metadata batch {}/{}", index + 1, batch_count);

            let batch = self.fetch_chunk(chunk, &operation, cancel).await?;

            for meta in batch.fetched {
                outcome.metadata.insert(meta.id.clone(), meta);
            }
            let succeeded = match batch.error {
                None => true,
                Some(e) if batch.call_failed => {
                    warn!("{} failed, {} messages skipped: {}", operation, batch.pending.len(), e);
                    outcome.failed_batches += 1;
                    false
                }
                Some(e) => {
                    for id in &batch.pending {
                        warn!("Skipping message {}: {}", id, e);
                    }
                    true
                }
            };

            on_progress(chunk.len() as u64);

            let is_last = index + 1 == batch_count;
            if succeeded && !is_last {
                let delay = self.pacing.fetch_delay(offset, total);
                debug!("Pacing {:?} after {}", delay, operation);
                pause(delay, cancel).await?;
            }
        }

        outcome.missing = ids
            .iter()
            .filter(|id| !outcome.metadata.contains_key(id.as_str()))
            .count();

        if outcome.missing > 0 {
            warn!(
                "Metadata unavailable for {} of {} messages",
                outcome.missing, total
            );
        }

        Ok(outcome)
    }

    /// Fetch one batch, resubmitting only the ids whose sub-request was
    /// throttled.
    ///
    /// Throttled calls and throttled sub-requests draw on the same retry
    /// budget. Only cancellation is returned as `Err`; any other failure is
    /// left in [`ChunkState::error`].
    async fn fetch_chunk(
        &self,
        chunk: &[MessageId],
        operation: &str,
        cancel: &CancellationToken,
    ) -> Result<ChunkState> {
        let state = Mutex::new(ChunkState {
            pending: chunk.to_vec(),
            ..Default::default()
        });
        let shared = &state;

        let result = with_retry(operation, &self.retry, cancel, move || async move {
            let pending = lock(shared).pending.clone();
            let batch = match self.client.get_metadata_batch(&pending).await {
                Ok(batch) => batch,
                Err(e) => {
                    lock(shared).call_failed = true;
                    return Err(e);
                }
            };

            let mut state = lock(shared);
            state.call_failed = false;
            state.pending.clear();
            let mut throttled = None;
            for (id, item) in batch {
                match item {
                    Ok(meta) => state.fetched.push(meta),
                    Err(e) if e.is_rate_limited() => {
                        state.pending.push(id);
                        throttled = Some(e);
                    }
                    Err(e) => warn!("Skipping message {}: {}", id, e),
                }
            }

            match throttled {
                Some(e) => {
                    debug!("{} of {} sub-requests throttled", state.pending.len(), pending.len());
                    Err(e)
                }
                None => Ok(()),
            }
        })
        .await;

        let mut state = state.into_inner().unwrap_or_else(PoisonError::into_inner);
        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => state.error = Some(e),
        }
        Ok(state)
    }
}

impl FetchOutcome {
    pub fn get(&self, id: &str) -> Option<&MessageMetadata> {
        self.metadata.get(id)
    }
}
