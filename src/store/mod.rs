//! Storage seams. The pipeline only talks to these traits so it can run on
//! Postgres in production and on [`memory::InMemoryStore`] in tests.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::{
    ContentId, ContentItem, Notification, Subscriber, SubscriberEmail, SubscriberScope,
};
use crate::queue::Queue;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

#[async_trait::async_trait]
pub trait SubscriberStore: Send + Sync {
    /// Active, confirmed subscribers ordered by email.
    async fn deliverable(&self) -> Result<Vec<Subscriber>, anyhow::Error>;
    async fn find_by_email(&self, email: &SubscriberEmail) -> Result<Option<Subscriber>, anyhow::Error>;
    async fn insert(&self, subscriber: &Subscriber) -> Result<(), anyhow::Error>;
    async fn update_scope(
        &self,
        id: Uuid,
        scope: &SubscriberScope,
        now: DateTime<Utc>,
    ) -> Result<(), anyhow::Error>;
    async fn confirm(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error>;
    async fn delete(&self, id: Uuid) -> Result<(), anyhow::Error>;
    /// Deletes unconfirmed subscribers whose grace window ended before `now`.
    async fn purge_unconfirmed(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error>;
}

#[async_trait::async_trait]
pub trait NotificationStore: Send + Sync {
    /// Unpaused, unsent notifications in enqueue order.
    async fn pending(&self) -> Result<Vec<Notification>, anyhow::Error>;
    async fn all(&self) -> Result<Vec<Notification>, anyhow::Error>;
    async fn find_by_content(&self, content_id: ContentId) -> Result<Option<Notification>, anyhow::Error>;
    async fn insert(&self, notification: &Notification) -> Result<(), anyhow::Error>;
    /// Returns false when the notification does not exist.
    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool, anyhow::Error>;
    async fn set_last_sent(&self, ids: &[Uuid], sent_at: Option<DateTime<Utc>>) -> Result<u64, anyhow::Error>;
    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error>;
    async fn delete_sent(&self) -> Result<u64, anyhow::Error>;
    async fn last_sent(&self) -> Result<Option<DateTime<Utc>>, anyhow::Error>;
}

/// Read access to the external content store, plus the per-item send history we own.
#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    async fn content(&self, id: ContentId) -> Result<Option<ContentItem>, anyhow::Error>;
    async fn append_send_history(&self, id: ContentId, sent_at: DateTime<Utc>) -> Result<(), anyhow::Error>;
    async fn send_history(&self, id: ContentId) -> Result<Vec<DateTime<Utc>>, anyhow::Error>;
}

/// The persisted queue singleton and its lock.
#[async_trait::async_trait]
pub trait QueueStore: Send + Sync {
    /// Compare-and-swap on the build token. A lock older than `stale_after` is taken over.
    async fn try_lock(&self, token: Uuid, now: DateTime<Utc>, stale_after: Duration) -> Result<bool, anyhow::Error>;
    /// Moves `acquired_at` to `now` if `token` still holds the lock. Returns false otherwise.
    async fn refresh_lock(&self, token: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error>;
    async fn unlock(&self, token: Uuid) -> Result<(), anyhow::Error>;
    async fn load(&self) -> Result<Option<Queue>, anyhow::Error>;
    /// Replaces whatever queue is stored.
    async fn insert(&self, queue: &Queue) -> Result<(), anyhow::Error>;
    /// Overwrites the stored queue only if it is the same queue. Returns false otherwise.
    async fn update(&self, queue: &Queue) -> Result<bool, anyhow::Error>;
    async fn clear(&self) -> Result<bool, anyhow::Error>;
    async fn add_sent(&self, emails: u64) -> Result<u64, anyhow::Error>;
    async fn sent_total(&self) -> Result<u64, anyhow::Error>;
}

/// Handles to every store the pipeline needs.
#[derive(Clone)]
pub struct Stores {
    pub subscribers: Arc<dyn SubscriberStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub content: Arc<dyn ContentStore>,
    pub queue: Arc<dyn QueueStore>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SubscriberStore + NotificationStore + ContentStore + QueueStore + 'static,
    {
        Self {
            subscribers: store.clone(),
            notifications: store.clone(),
            content: store.clone(),
            queue: store,
        }
    }
}
