use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::{SubscriberEmail, SubscriberScope, VerificationCode};

/// Unconfirmed subscribers older than this are purged.
pub const CONFIRMATION_GRACE_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    Unconfirmed,
    Confirmed,
}

impl ConfirmationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmationState::Unconfirmed => "unconfirmed",
            ConfirmationState::Confirmed => "confirmed",
        }
    }
}

impl TryFrom<String> for ConfirmationState {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "unconfirmed" => Ok(Self::Unconfirmed),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(format!("{other} is not a confirmation state.")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Trashed,
}

impl Lifecycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Trashed => "trashed",
        }
    }
}

impl TryFrom<String> for Lifecycle {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(Self::Active),
            "trashed" => Ok(Self::Trashed),
            other => Err(format!("{other} is not a lifecycle state.")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: Uuid,
    pub email: SubscriberEmail,
    pub confirmation: ConfirmationState,
    pub code: VerificationCode,
    pub scope: SubscriberScope,
    pub lifecycle: Lifecycle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscriber {
    /// Active and confirmed subscribers are the only ones that receive notifications.
    pub fn is_deliverable(&self) -> bool {
        self.lifecycle == Lifecycle::Active && self.confirmation == ConfirmationState::Confirmed
    }

    pub fn is_purgeable(&self, now: DateTime<Utc>) -> bool {
        self.confirmation == ConfirmationState::Unconfirmed
            && self.created_at + Duration::hours(CONFIRMATION_GRACE_HOURS) < now
    }
}

pub struct NewSubscriber {
    pub email: SubscriberEmail,
    pub scope: SubscriberScope,
}

impl NewSubscriber {
    pub fn into_subscriber(self, now: DateTime<Utc>) -> Subscriber {
        Subscriber {
            id: Uuid::new_v4(),
            email: self.email,
            confirmation: ConfirmationState::Unconfirmed,
            code: VerificationCode::new(),
            scope: self.scope,
            lifecycle: Lifecycle::Active,
            created_at: now,
            updated_at: now,
        }
    }
}
