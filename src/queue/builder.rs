use std::num::NonZeroUsize;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{Batch, Queue, QueuedNotification, RenderedEmail, partition};
use crate::domain::{BlockReason, ContentId, ContentItem, ContentTags, Subscriber};
use crate::scope::{ExclusionRules, ScopeMatcher, resolve};
use crate::store::{ContentStore, NotificationStore, Stores, SubscriberStore};
use crate::template::EmailComposer;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BlockedNotification {
    pub notification_id: Uuid,
    pub content_id: ContentId,
    pub reason: BlockReason,
}

/// Everything one build cycle produced.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub sendable: Vec<QueuedNotification>,
    pub blocked: Vec<BlockedNotification>,
    pub batches: Vec<Batch>,
    pub render_failures: usize,
}

impl BuildReport {
    pub fn email_count(&self) -> usize {
        self.batches.iter().map(|b| b.emails.len()).sum()
    }

    pub fn into_queue(self, now: DateTime<Utc>, ttl: Duration) -> Queue {
        Queue::new(self.sendable, self.batches, now, ttl)
    }
}

struct Sendable {
    notification: QueuedNotification,
    item: ContentItem,
    tags: ContentTags,
}

/// Turns pending notifications into consolidated, batched emails.
pub struct QueueBuilder {
    notifications: Arc<dyn NotificationStore>,
    content: Arc<dyn ContentStore>,
    subscribers: Arc<dyn SubscriberStore>,
    rules: ExclusionRules,
    matcher: ScopeMatcher,
    composer: EmailComposer,
    batch_limit: NonZeroUsize,
}

impl QueueBuilder {
    pub fn new(
        stores: &Stores,
        rules: ExclusionRules,
        matcher: ScopeMatcher,
        composer: EmailComposer,
        batch_limit: NonZeroUsize,
    ) -> Self {
        Self {
            notifications: stores.notifications.clone(),
            content: stores.content.clone(),
            subscribers: stores.subscribers.clone(),
            rules,
            matcher,
            composer,
            batch_limit,
        }
    }

    pub fn batch_limit(&self) -> NonZeroUsize {
        self.batch_limit
    }

    /// Reads a content item fresh and resolves it against the exclusion rules.
    pub async fn eligibility(&self, content_id: ContentId) -> Result<Result<ContentTags, BlockReason>, anyhow::Error> {
        let item = self.content.content(content_id).await?;
        Ok(resolve(item.as_ref(), &self.rules))
    }

    #[tracing::instrument(name = "Build notification queue", skip(self), fields(
        sendable = tracing::field::Empty,
        blocked = tracing::field::Empty,
        emails = tracing::field::Empty,
        render_failures = tracing::field::Empty,
    ))]
    pub async fn build(&self) -> Result<BuildReport, anyhow::Error> {
        let (sendable, blocked) = self.partition_notifications().await?;

        let mut subscribers = self.subscribers.deliverable().await?;
        subscribers.sort_by(|a, b| a.email.cmp(&b.email));
        subscribers.dedup_by(|a, b| a.email == b.email);

        let mut emails = Vec::new();
        let mut render_failures = 0;
        if !sendable.is_empty() {
            for subscriber in &subscribers {
                match self.render_for(subscriber, &sendable) {
                    Ok(Some(email)) => emails.push(email),
                    Ok(None) => {}
                    Err(e) => {
                        render_failures += 1;
                        tracing::warn!(
                            error.cause_chain = ?e,
                            error.message = %e,
                            subscriber_id = %subscriber.id,
                            reason = "subscriber_render_failure",
                            "Skipping a subscriber. Their email could not be rendered."
                        );
                    }
                }
            }
        }

        let report = BuildReport {
            sendable: sendable.into_iter().map(|s| s.notification).collect(),
            blocked,
            batches: partition(emails, self.batch_limit),
            render_failures,
        };

        let span = tracing::Span::current();
        span.record("sendable", report.sendable.len());
        span.record("blocked", report.blocked.len());
        span.record("emails", report.email_count());
        span.record("render_failures", report.render_failures);
        Ok(report)
    }

    async fn partition_notifications(
        &self,
    ) -> Result<(Vec<Sendable>, Vec<BlockedNotification>), anyhow::Error> {
        let mut sendable = Vec::new();
        let mut blocked = Vec::new();

        for notification in self.notifications.pending().await? {
            let item = self.content.content(notification.content_id).await?;
            match resolve(item.as_ref(), &self.rules) {
                Ok(tags) => {
                    let Some(item) = item else { continue };
                    sendable.push(Sendable {
                        notification: QueuedNotification {
                            notification_id: notification.id,
                            content_id: notification.content_id,
                        },
                        item,
                        tags,
                    });
                }
                Err(reason) => {
                    tracing::info!(
                        notification_id = %notification.id,
                        content_id = notification.content_id,
                        %reason,
                        "Notification is blocked"
                    );
                    blocked.push(BlockedNotification {
                        notification_id: notification.id,
                        content_id: notification.content_id,
                        reason,
                    });
                }
            }
        }
        Ok((sendable, blocked))
    }

    /// One email per subscriber covering every update they matched, or none.
    fn render_for(
        &self,
        subscriber: &Subscriber,
        sendable: &[Sendable],
    ) -> Result<Option<RenderedEmail>, crate::template::RenderError> {
        let updates: Vec<&ContentItem> = sendable
            .iter()
            .filter(|s| self.matcher.approves(subscriber, &s.tags))
            .map(|s| &s.item)
            .collect();
        if updates.is_empty() {
            return Ok(None);
        }

        let composed = self.composer.notification(subscriber, &updates)?;
        Ok(Some(RenderedEmail {
            to: subscriber.email.clone(),
            subject: composed.subject,
            html: composed.html,
            subscriber_id: subscriber.id,
        }))
    }
}
