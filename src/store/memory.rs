use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ContentStore, NotificationStore, QueueStore, SubscriberStore};
use crate::domain::{
    ConfirmationState, ContentId, ContentItem, Notification, Subscriber, SubscriberEmail,
    SubscriberScope,
};
use crate::queue::Queue;

#[derive(Default)]
struct State {
    subscribers: HashMap<Uuid, Subscriber>,
    notifications: Vec<Notification>,
    content: HashMap<ContentId, ContentItem>,
    send_history: BTreeMap<ContentId, Vec<DateTime<Utc>>>,
    // Kept serialized so every load goes through the same round-trip as Postgres.
    queue: Option<serde_json::Value>,
    lock: Option<(Uuid, DateTime<Utc>)>,
    sent_total: u64,
}

/// Process-local storage for tests and demos.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_content(&self, item: ContentItem) {
        self.state.lock().await.content.insert(item.id, item);
    }

    pub async fn remove_content(&self, id: ContentId) {
        self.state.lock().await.content.remove(&id);
    }

    pub async fn put_subscriber(&self, subscriber: Subscriber) {
        self.state
            .lock()
            .await
            .subscribers
            .insert(subscriber.id, subscriber);
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        self.state.lock().await.subscribers.values().cloned().collect()
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.lock.is_some()
    }
}

#[async_trait::async_trait]
impl SubscriberStore for InMemoryStore {
    async fn deliverable(&self) -> Result<Vec<Subscriber>, anyhow::Error> {
        let state = self.state.lock().await;
        let mut subscribers: Vec<Subscriber> = state
            .subscribers
            .values()
            .filter(|s| s.is_deliverable())
            .cloned()
            .collect();
        subscribers.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(subscribers)
    }

    async fn find_by_email(&self, email: &SubscriberEmail) -> Result<Option<Subscriber>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state.subscribers.values().find(|s| &s.email == email).cloned())
    }

    async fn insert(&self, subscriber: &Subscriber) -> Result<(), anyhow::Error> {
        let mut state = self.state.lock().await;
        if state.subscribers.values().any(|s| s.email == subscriber.email) {
            anyhow::bail!("A subscriber with this email already exists.");
        }
        state.subscribers.insert(subscriber.id, subscriber.clone());
        Ok(())
    }

    async fn update_scope(
        &self,
        id: Uuid,
        scope: &SubscriberScope,
        now: DateTime<Utc>,
    ) -> Result<(), anyhow::Error> {
        if let Some(s) = self.state.lock().await.subscribers.get_mut(&id) {
            s.scope = scope.clone();
            s.updated_at = now;
        }
        Ok(())
    }

    async fn confirm(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), anyhow::Error> {
        if let Some(s) = self.state.lock().await.subscribers.get_mut(&id) {
            s.confirmation = ConfirmationState::Confirmed;
            s.updated_at = now;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), anyhow::Error> {
        self.state.lock().await.subscribers.remove(&id);
        Ok(())
    }

    async fn purge_unconfirmed(&self, now: DateTime<Utc>) -> Result<u64, anyhow::Error> {
        let mut state = self.state.lock().await;
        let before = state.subscribers.len();
        state.subscribers.retain(|_, s| !s.is_purgeable(now));
        Ok((before - state.subscribers.len()) as u64)
    }
}

#[async_trait::async_trait]
impl NotificationStore for InMemoryStore {
    async fn pending(&self) -> Result<Vec<Notification>, anyhow::Error> {
        let state = self.state.lock().await;
        let mut pending: Vec<Notification> = state
            .notifications
            .iter()
            .filter(|n| n.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|n| (n.enqueued_at, n.content_id));
        Ok(pending)
    }

    async fn all(&self) -> Result<Vec<Notification>, anyhow::Error> {
        let mut all = self.state.lock().await.notifications.clone();
        all.sort_by_key(|n| (n.enqueued_at, n.content_id));
        Ok(all)
    }

    async fn find_by_content(&self, content_id: ContentId) -> Result<Option<Notification>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .find(|n| n.content_id == content_id)
            .cloned())
    }

    async fn insert(&self, notification: &Notification) -> Result<(), anyhow::Error> {
        let mut state = self.state.lock().await;
        if state
            .notifications
            .iter()
            .any(|n| n.content_id == notification.content_id)
        {
            anyhow::bail!("A notification for this content already exists.");
        }
        state.notifications.push(notification.clone());
        Ok(())
    }

    async fn set_paused(&self, id: Uuid, paused: bool) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        Ok(match state.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.paused = paused;
                true
            }
            None => false,
        })
    }

    async fn set_last_sent(&self, ids: &[Uuid], sent_at: Option<DateTime<Utc>>) -> Result<u64, anyhow::Error> {
        let mut state = self.state.lock().await;
        let mut updated = 0;
        for n in state.notifications.iter_mut().filter(|n| ids.contains(&n.id)) {
            n.last_sent = sent_at;
            updated += 1;
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.id != id);
        Ok(state.notifications.len() != before)
    }

    async fn delete_sent(&self) -> Result<u64, anyhow::Error> {
        let mut state = self.state.lock().await;
        let before = state.notifications.len();
        state.notifications.retain(|n| n.last_sent.is_none());
        Ok((before - state.notifications.len()) as u64)
    }

    async fn last_sent(&self) -> Result<Option<DateTime<Utc>>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state.notifications.iter().filter_map(|n| n.last_sent).max())
    }
}

#[async_trait::async_trait]
impl ContentStore for InMemoryStore {
    async fn content(&self, id: ContentId) -> Result<Option<ContentItem>, anyhow::Error> {
        Ok(self.state.lock().await.content.get(&id).cloned())
    }

    async fn append_send_history(&self, id: ContentId, sent_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        self.state
            .lock()
            .await
            .send_history
            .entry(id)
            .or_default()
            .push(sent_at);
        Ok(())
    }

    async fn send_history(&self, id: ContentId) -> Result<Vec<DateTime<Utc>>, anyhow::Error> {
        let state = self.state.lock().await;
        Ok(state.send_history.get(&id).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl QueueStore for InMemoryStore {
    async fn try_lock(&self, token: Uuid, now: DateTime<Utc>, stale_after: Duration) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        match state.lock {
            Some((_, acquired_at)) if acquired_at + stale_after > now => Ok(false),
            _ => {
                state.lock = Some((token, now));
                Ok(true)
            }
        }
    }

    async fn refresh_lock(&self, token: Uuid, now: DateTime<Utc>) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        match state.lock.as_mut() {
            Some((held, acquired_at)) if *held == token => {
                *acquired_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, token: Uuid) -> Result<(), anyhow::Error> {
        let mut state = self.state.lock().await;
        if state.lock.is_some_and(|(held, _)| held == token) {
            state.lock = None;
        }
        Ok(())
    }

    async fn load(&self) -> Result<Option<Queue>, anyhow::Error> {
        let state = self.state.lock().await;
        state
            .queue
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }

    async fn insert(&self, queue: &Queue) -> Result<(), anyhow::Error> {
        self.state.lock().await.queue = Some(serde_json::to_value(queue)?);
        Ok(())
    }

    async fn update(&self, queue: &Queue) -> Result<bool, anyhow::Error> {
        let mut state = self.state.lock().await;
        let same_queue = state
            .queue
            .as_ref()
            .and_then(|stored| stored.get("id"))
            .and_then(|id| id.as_str())
            .is_some_and(|id| id == queue.id.to_string());
        if same_queue {
            state.queue = Some(serde_json::to_value(queue)?);
        }
        Ok(same_queue)
    }

    async fn clear(&self) -> Result<bool, anyhow::Error> {
        Ok(self.state.lock().await.queue.take().is_some())
    }

    async fn add_sent(&self, emails: u64) -> Result<u64, anyhow::Error> {
        let mut state = self.state.lock().await;
        state.sent_total += emails;
        Ok(state.sent_total)
    }

    async fn sent_total(&self) -> Result<u64, anyhow::Error> {
        Ok(self.state.lock().await.sent_total)
    }
}
