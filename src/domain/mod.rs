mod content;
mod notification;
mod scope;
mod subscriber;
mod subscriber_email;
mod verification_code;

pub use content::{AuthorId, BlockReason, ContentId, ContentItem, PublishStatus, TermId};
pub use notification::{Notification, NotificationStatus};
pub use scope::{ContentTags, ScopeError, ScopeRules, SubscriberScope};
pub use subscriber::{
    CONFIRMATION_GRACE_HOURS, ConfirmationState, Lifecycle, NewSubscriber, Subscriber,
};
pub use subscriber_email::SubscriberEmail;
pub use verification_code::VerificationCode;
