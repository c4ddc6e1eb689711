use std::num::NonZeroUsize;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::{ContentId, SubscriberEmail};

pub const QUEUE_TTL_HOURS: i64 = 24;

/// A personalised email ready for the provider.
#[derive(Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderedEmail {
    pub to: SubscriberEmail,
    pub subject: String,
    pub html: String,
    /// Used for log correlation instead of the address.
    pub subscriber_id: Uuid,
}

impl std::fmt::Debug for RenderedEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderedEmail")
            .field("subscriber_id", &self.subscriber_id)
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Batch {
    pub emails: Vec<RenderedEmail>,
    pub state: DispatchState,
}

/// The notification a queue was built from, so it can be marked sent on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct QueuedNotification {
    pub notification_id: Uuid,
    pub content_id: ContentId,
}

/// The persisted output of one build cycle.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Queue {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub notifications: Vec<QueuedNotification>,
    pub batches: Vec<Batch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    Empty,
    Building,
    Ready,
    Dispatching,
    Completed,
    PartiallyFailed,
}

impl QueueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Empty => "empty",
            QueueState::Building => "building",
            QueueState::Ready => "ready",
            QueueState::Dispatching => "dispatching",
            QueueState::Completed => "completed",
            QueueState::PartiallyFailed => "partially_failed",
        }
    }
}

/// Splits emails into provider-sized batches, keeping their order.
pub fn partition(emails: Vec<RenderedEmail>, limit: NonZeroUsize) -> Vec<Batch> {
    emails
        .chunks(limit.get())
        .map(|chunk| Batch {
            emails: chunk.to_vec(),
            state: DispatchState::Pending,
        })
        .collect()
}

impl Queue {
    pub fn new(
        notifications: Vec<QueuedNotification>,
        batches: Vec<Batch>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            expires_at: now + ttl,
            notifications,
            batches,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn email_count(&self) -> usize {
        self.batches.iter().map(|b| b.emails.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.batches.iter().all(|b| b.state == DispatchState::Sent)
    }

    /// Indices of batches that still need to go out, failed ones included.
    pub fn outstanding(&self) -> Vec<usize> {
        self.batches
            .iter()
            .enumerate()
            .filter(|(_, b)| b.state != DispatchState::Sent)
            .map(|(i, _)| i)
            .collect()
    }

    /// Resting state of a persisted queue.
    pub fn state(&self) -> QueueState {
        if self.is_complete() {
            QueueState::Completed
        } else if self.batches.iter().any(|b| b.state == DispatchState::Failed) {
            QueueState::PartiallyFailed
        } else {
            QueueState::Ready
        }
    }
}
