//! Operator-facing entry points of the notification pipeline.
//!
//! Every build or dispatch runs under the queue lock held in storage, so two
//! processes sharing a database never interleave. Clearing the queue does not
//! need the lock: it cancels whatever this process is dispatching and drops the
//! stored record, which makes any other dispatcher stop at its next batch.
//!
//! The lock is held through a [`CycleGuard`]. A build or dispatch whose future
//! is dropped halfway, for example because the HTTP request went away, still
//! releases it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::{BlockReason, ContentId, Notification, NotificationStatus};
use crate::email_client::{EmailProvider, ProviderError, Quota};
use crate::queue::{
    BlockedNotification, DispatchError, DispatchReport, Dispatcher, Queue, QueueBuilder, QueueState,
};
use crate::routes::error_chain_fmt;
use crate::store::Stores;

#[derive(thiserror::Error)]
pub enum NotifierError {
    #[error("The content cannot be notified about: {0}.")]
    ContentBlocked(BlockReason),
    #[error("The provider quota has {remaining} requests left but {required} are needed.")]
    QuotaExceeded { remaining: u64, required: u64 },
    #[error("Another build or dispatch is in progress.")]
    ConcurrentBuildOrDispatch,
    #[error("A queue is still waiting to be dispatched. Dispatch or clear it first.")]
    QueuePending,
    #[error("There is no queue to dispatch.")]
    QueueMissing,
    #[error("The notification does not exist.")]
    NotFound,
    #[error("The email provider could not be reached.")]
    Provider(#[source] ProviderError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl std::fmt::Debug for NotifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

impl NotifierError {
    pub fn reason_code(&self) -> &'static str {
        match self {
            NotifierError::ContentBlocked(_) => "content_blocked",
            NotifierError::QuotaExceeded { .. } => "quota_exceeded",
            NotifierError::ConcurrentBuildOrDispatch => "concurrent_build_or_dispatch",
            NotifierError::QueuePending => "queue_pending",
            NotifierError::QueueMissing => "queue_missing",
            NotifierError::NotFound => "not_found",
            NotifierError::Provider(_) => "provider_unavailable",
            NotifierError::Storage(_) => "storage_unavailable",
        }
    }
}

impl From<DispatchError> for NotifierError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::QueueGone => NotifierError::QueueMissing,
            DispatchError::LockLost => NotifierError::ConcurrentBuildOrDispatch,
            DispatchError::Storage(e) => NotifierError::Storage(e),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NotifierPolicy {
    pub queue_ttl: Duration,
    pub lock_timeout: Duration,
    pub disable_blocked_enqueue: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BuildSummary {
    pub queue_id: Option<Uuid>,
    pub state: QueueState,
    pub sendable: usize,
    pub blocked: Vec<BlockedNotification>,
    pub emails: usize,
    pub batches: usize,
    pub render_failures: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchSummary {
    pub queue_id: Uuid,
    #[serde(flatten)]
    pub report: DispatchReport,
    pub emails_sent: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct QueueStatistics {
    pub state: QueueState,
    pub sendable: usize,
    pub blocked: usize,
    pub emails: usize,
    pub batches: usize,
    pub batch_limit: usize,
    pub last_sent: Option<DateTime<Utc>>,
    pub emails_sent: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct QuotaReport {
    pub quota: u64,
    pub remaining: u64,
    pub required: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct NotificationView {
    pub id: Uuid,
    pub content_id: ContentId,
    pub enqueued_at: DateTime<Utc>,
    pub paused: bool,
    pub last_sent: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub status: NotificationStatus,
}

struct Activity {
    token: Uuid,
    state: QueueState,
    cancel: CancellationToken,
}

/// The queue lock of one build or dispatch.
///
/// [`CycleGuard::release`] frees it in line. Dropping the guard without
/// releasing it clears the activity right away and unlocks from a spawned task.
struct CycleGuard<'a> {
    notifier: &'a Notifier,
    token: Uuid,
    cancel: CancellationToken,
    released: bool,
}

impl CycleGuard<'_> {
    async fn release(mut self) {
        self.notifier.end_activity(self.token);
        if let Err(e) = self.notifier.stores.queue.unlock(self.token).await {
            log_unlock_failure(&e);
        }
        self.released = true;
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!(lock = %self.token, "Build or dispatch abandoned, releasing the queue lock");
        self.notifier.end_activity(self.token);
        let queue = self.notifier.stores.queue.clone();
        let token = self.token;
        tokio::spawn(async move {
            if let Err(e) = queue.unlock(token).await {
                log_unlock_failure(&e);
            }
        });
    }
}

fn log_unlock_failure(e: &anyhow::Error) {
    tracing::error!(
        error.cause_chain = ?e,
        error.message = %e,
        "Failed to release the queue lock. It will be taken over once stale."
    );
}

pub struct Notifier {
    stores: Stores,
    builder: QueueBuilder,
    dispatcher: Dispatcher,
    provider: Arc<dyn EmailProvider>,
    policy: NotifierPolicy,
    shutdown: CancellationToken,
    activity: Mutex<Option<Activity>>,
}

impl Notifier {
    pub fn new(
        stores: Stores,
        builder: QueueBuilder,
        dispatcher: Dispatcher,
        provider: Arc<dyn EmailProvider>,
        policy: NotifierPolicy,
    ) -> Self {
        Self {
            stores,
            builder,
            dispatcher,
            provider,
            policy,
            shutdown: CancellationToken::new(),
            activity: Mutex::new(None),
        }
    }

    fn activity(&self) -> MutexGuard<'_, Option<Activity>> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_activity(&self, token: Uuid) {
        let mut activity = self.activity();
        if activity.as_ref().is_some_and(|a| a.token == token) {
            *activity = None;
        }
    }

    /// Cancels any in-flight dispatch when the process is stopping.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn lock(&self, state: QueueState) -> Result<CycleGuard<'_>, NotifierError> {
        let token = Uuid::new_v4();
        if !self
            .stores
            .queue
            .try_lock(token, Utc::now(), self.policy.lock_timeout)
            .await?
        {
            return Err(NotifierError::ConcurrentBuildOrDispatch);
        }
        let cancel = self.shutdown.child_token();
        *self.activity() = Some(Activity {
            token,
            state,
            cancel: cancel.clone(),
        });
        Ok(CycleGuard {
            notifier: self,
            token,
            cancel,
            released: false,
        })
    }

    /// The stored queue, dropping it first if it outlived its TTL.
    async fn live_queue(&self, now: DateTime<Utc>) -> Result<Option<Queue>, NotifierError> {
        match self.stores.queue.load().await? {
            Some(queue) if queue.is_expired(now) => {
                tracing::info!(queue_id = %queue.id, "Discarding an expired queue");
                self.stores.queue.clear().await?;
                Ok(None)
            }
            queue => Ok(queue),
        }
    }

    #[tracing::instrument(name = "Build queue", skip(self))]
    pub async fn build_queue(&self) -> Result<BuildSummary, NotifierError> {
        let guard = self.lock(QueueState::Building).await?;
        let outcome = self.build_locked(Utc::now()).await;
        guard.release().await;
        outcome
    }

    async fn build_locked(&self, now: DateTime<Utc>) -> Result<BuildSummary, NotifierError> {
        if let Some(queue) = self.live_queue(now).await? {
            if !queue.is_complete() {
                return Err(NotifierError::QueuePending);
            }
            self.stores.queue.clear().await?;
        }

        let report = self.builder.build().await?;
        let mut summary = BuildSummary {
            queue_id: None,
            state: QueueState::Completed,
            sendable: report.sendable.len(),
            blocked: report.blocked.clone(),
            emails: report.email_count(),
            batches: report.batches.len(),
            render_failures: report.render_failures,
        };
        if report.batches.is_empty() {
            tracing::info!("Nothing to send");
            return Ok(summary);
        }

        let queue = report.into_queue(now, self.policy.queue_ttl);
        self.stores.queue.insert(&queue).await?;
        summary.queue_id = Some(queue.id);
        summary.state = queue.state();
        tracing::info!(queue_id = %queue.id, "Queue is ready");
        Ok(summary)
    }

    /// Sends the stored queue. Only batches not yet sent go out.
    #[tracing::instrument(name = "Dispatch queue", skip(self))]
    pub async fn dispatch(&self, check_quota: bool) -> Result<DispatchSummary, NotifierError> {
        let guard = self.lock(QueueState::Dispatching).await?;
        let outcome = self.dispatch_locked(check_quota, &guard).await;
        guard.release().await;
        outcome
    }

    async fn dispatch_locked(
        &self,
        check_quota: bool,
        guard: &CycleGuard<'_>,
    ) -> Result<DispatchSummary, NotifierError> {
        let mut queue = self
            .live_queue(Utc::now())
            .await?
            .ok_or(NotifierError::QueueMissing)?;

        if check_quota {
            self.quota_for(&queue).await?;
        }

        let report = self
            .dispatcher
            .dispatch(&mut queue, guard.token, &guard.cancel)
            .await?;
        tracing::info!(
            queue_id = %queue.id,
            state = report.state.as_str(),
            cancelled = report.cancelled,
            "Dispatch finished"
        );
        let emails_sent = self
            .stores
            .queue
            .add_sent(report.sent_emails() as u64)
            .await?;

        if queue.is_complete() {
            self.complete(&queue).await?;
        }

        Ok(DispatchSummary {
            queue_id: queue.id,
            report,
            emails_sent,
        })
    }

    async fn complete(&self, queue: &Queue) -> Result<(), NotifierError> {
        let sent_at = Utc::now();
        let ids: Vec<Uuid> = queue.notifications.iter().map(|n| n.notification_id).collect();
        self.stores
            .notifications
            .set_last_sent(&ids, Some(sent_at))
            .await?;
        for notification in &queue.notifications {
            self.stores
                .content
                .append_send_history(notification.content_id, sent_at)
                .await?;
        }
        self.stores.queue.clear().await?;
        tracing::info!(queue_id = %queue.id, notifications = ids.len(), "Queue completed");
        Ok(())
    }

    /// Drops the stored queue and stops a dispatch running in this process.
    #[tracing::instrument(name = "Clear queue", skip(self))]
    pub async fn clear_queue(&self) -> Result<bool, NotifierError> {
        if let Some(activity) = self.activity().as_ref() {
            activity.cancel.cancel();
        }
        Ok(self.stores.queue.clear().await?)
    }

    pub async fn state(&self) -> Result<QueueState, NotifierError> {
        if let Some(state) = self.activity().as_ref().map(|a| a.state) {
            return Ok(state);
        }
        Ok(match self.stores.queue.load().await? {
            Some(queue) if !queue.is_expired(Utc::now()) => queue.state(),
            _ => QueueState::Empty,
        })
    }

    #[tracing::instrument(name = "Queue statistics", skip(self))]
    pub async fn statistics(&self) -> Result<QueueStatistics, NotifierError> {
        let mut sendable = 0;
        let mut blocked = 0;
        for notification in self.stores.notifications.pending().await? {
            match self.builder.eligibility(notification.content_id).await? {
                Ok(_) => sendable += 1,
                Err(_) => blocked += 1,
            }
        }

        let queue = self
            .stores
            .queue
            .load()
            .await?
            .filter(|q| !q.is_expired(Utc::now()));

        Ok(QueueStatistics {
            state: self.state().await?,
            sendable,
            blocked,
            emails: queue.as_ref().map(Queue::email_count).unwrap_or(0),
            batches: queue.as_ref().map(|q| q.batches.len()).unwrap_or(0),
            batch_limit: self.builder.batch_limit().get(),
            last_sent: self.stores.notifications.last_sent().await?,
            emails_sent: self.stores.queue.sent_total().await?,
        })
    }

    /// Compares the provider quota with the requests the stored queue still needs.
    #[tracing::instrument(name = "Check provider quota", skip(self))]
    pub async fn check_quota(&self) -> Result<QuotaReport, NotifierError> {
        match self.live_queue(Utc::now()).await? {
            Some(queue) => self.quota_for(&queue).await,
            None => {
                let Quota { quota, remaining } =
                    self.provider.quota().await.map_err(NotifierError::Provider)?;
                Ok(QuotaReport {
                    quota,
                    remaining,
                    required: 0,
                })
            }
        }
    }

    async fn quota_for(&self, queue: &Queue) -> Result<QuotaReport, NotifierError> {
        let Quota { quota, remaining } =
            self.provider.quota().await.map_err(NotifierError::Provider)?;
        let required = queue.outstanding().len() as u64;
        if remaining < required {
            return Err(NotifierError::QuotaExceeded {
                remaining,
                required,
            });
        }
        Ok(QuotaReport {
            quota,
            remaining,
            required,
        })
    }

    /// One notification per content item. Enqueueing twice returns the existing one.
    #[tracing::instrument(name = "Enqueue notification", skip(self))]
    pub async fn enqueue(&self, content_id: ContentId) -> Result<Notification, NotifierError> {
        if let Some(existing) = self.stores.notifications.find_by_content(content_id).await? {
            return Ok(existing);
        }
        if self.policy.disable_blocked_enqueue {
            if let Err(reason) = self.builder.eligibility(content_id).await? {
                return Err(NotifierError::ContentBlocked(reason));
            }
        }
        let notification = Notification::new(content_id, Utc::now());
        self.stores.notifications.insert(&notification).await?;
        Ok(notification)
    }

    pub async fn pause(&self, id: Uuid) -> Result<(), NotifierError> {
        self.set_paused(id, true).await
    }

    pub async fn unpause(&self, id: Uuid) -> Result<(), NotifierError> {
        self.set_paused(id, false).await
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<(), NotifierError> {
        if !self.stores.notifications.set_paused(id, paused).await? {
            return Err(NotifierError::NotFound);
        }
        Ok(())
    }

    /// Clears `last_sent` so the item goes out with the next build.
    pub async fn mark_unsent(&self, id: Uuid) -> Result<(), NotifierError> {
        if self.stores.notifications.set_last_sent(&[id], None).await? == 0 {
            return Err(NotifierError::NotFound);
        }
        Ok(())
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), NotifierError> {
        if !self.stores.notifications.delete(id).await? {
            return Err(NotifierError::NotFound);
        }
        Ok(())
    }

    pub async fn remove_sent(&self) -> Result<u64, NotifierError> {
        Ok(self.stores.notifications.delete_sent().await?)
    }

    pub async fn notifications(&self) -> Result<Vec<NotificationView>, NotifierError> {
        let mut views = Vec::new();
        for n in self.stores.notifications.all().await? {
            let status = if n.last_sent.is_some() {
                NotificationStatus::Sent
            } else if n.paused {
                NotificationStatus::Paused
            } else {
                match self.builder.eligibility(n.content_id).await? {
                    Ok(_) => NotificationStatus::Ready,
                    Err(reason) => NotificationStatus::Blocked(reason),
                }
            };
            views.push(NotificationView {
                id: n.id,
                content_id: n.content_id,
                enqueued_at: n.enqueued_at,
                paused: n.paused,
                last_sent: n.last_sent,
                status,
            });
        }
        Ok(views)
    }
}
