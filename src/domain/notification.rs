use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{BlockReason, ContentId};

/// A queued intent to email subscribers about one content item.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub content_id: ContentId,
    pub enqueued_at: DateTime<Utc>,
    pub paused: bool,
    pub last_sent: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn new(content_id: ContentId, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content_id,
            enqueued_at: now,
            paused: false,
            last_sent: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.paused && self.last_sent.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NotificationStatus {
    Sent,
    Paused,
    Ready,
    Blocked(BlockReason),
}
