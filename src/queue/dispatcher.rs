use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{DispatchState, Queue, QueueState};
use crate::email_client::{EmailProvider, ProviderError};
use crate::rate_limiter::RateLimiter;
use crate::routes::error_chain_fmt;
use crate::store::QueueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub emails: usize,
    pub state: DispatchState,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<BatchOutcome>,
    pub state: QueueState,
    /// The run stopped early. Batches not listed in `outcomes` were left untouched.
    pub cancelled: bool,
}

impl DispatchReport {
    pub fn sent_emails(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == DispatchState::Sent)
            .map(|o| o.emails)
            .sum()
    }
}

#[derive(thiserror::Error)]
pub enum DispatchError {
    #[error("The queue was cleared while it was being dispatched.")]
    QueueGone,
    #[error("The queue lock went stale and was taken over by another dispatch.")]
    LockLost,
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl std::fmt::Debug for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Sends the outstanding batches of a queue under the provider rate limit.
pub struct Dispatcher {
    provider: Arc<dyn EmailProvider>,
    limiter: Arc<RateLimiter>,
    queue_store: Arc<dyn QueueStore>,
}

impl Dispatcher {
    pub fn new(
        provider: Arc<dyn EmailProvider>,
        limiter: Arc<RateLimiter>,
        queue_store: Arc<dyn QueueStore>,
    ) -> Self {
        Self {
            provider,
            limiter,
            queue_store,
        }
    }

    async fn send(
        &self,
        batch: &[crate::queue::RenderedEmail],
        lock: Uuid,
    ) -> Result<Result<(), ProviderError>, DispatchError> {
        self.limiter.acquire().await;
        // Checked after the rate-limit wait, right before the batch leaves.
        if !self.queue_store.refresh_lock(lock, Utc::now()).await? {
            return Err(DispatchError::LockLost);
        }
        Ok(self.provider.send_batch(batch).await)
    }

    /// Sends every batch not yet marked sent, failed ones included.
    ///
    /// A batch becomes `Sent` only once the provider accepted it, and the queue
    /// is persisted after every batch. Cancelling abandons the batch in flight
    /// without touching its state.
    ///
    /// `lock` is the queue lock token of the caller. It is refreshed before
    /// every batch, and the dispatch stops with [`DispatchError::LockLost`]
    /// once another token holds it.
    #[tracing::instrument(name = "Dispatch notification queue", skip_all, fields(queue_id = %queue.id))]
    pub async fn dispatch(
        &self,
        queue: &mut Queue,
        lock: Uuid,
        cancel: &CancellationToken,
    ) -> Result<DispatchReport, DispatchError> {
        let mut outcomes = Vec::new();
        let mut cancelled = false;

        for index in queue.outstanding() {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.send(&queue.batches[index].emails, lock) => Some(result),
            };
            let Some(result) = result else {
                tracing::info!(batch = index, "Dispatch cancelled");
                cancelled = true;
                break;
            };
            let result = result?;

            let batch = &mut queue.batches[index];
            batch.state = match result {
                Ok(()) => {
                    tracing::info!(batch = index, emails = batch.emails.len(), "Batch sent");
                    DispatchState::Sent
                }
                Err(e) => {
                    tracing::error!(
                        error.cause_chain = ?e,
                        error.message = %e,
                        batch = index,
                        reason = e.reason_code(),
                        "Batch failed. It stays in the queue for a manual retry."
                    );
                    DispatchState::Failed
                }
            };
            outcomes.push(BatchOutcome {
                index,
                emails: batch.emails.len(),
                state: batch.state,
            });

            if !self.queue_store.update(queue).await? {
                return Err(DispatchError::QueueGone);
            }
        }

        Ok(DispatchReport {
            outcomes,
            state: queue.state(),
            cancelled,
        })
    }
}
