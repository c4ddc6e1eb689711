use std::collections::BTreeSet;

use crate::domain::{ContentTags, Subscriber, SubscriberEmail, SubscriberScope};

/// True when any one of the four scope criteria selects the content.
pub fn matches(scope: &SubscriberScope, tags: &ContentTags) -> bool {
    scope.everything
        || scope.content_types.contains(&tags.content_type)
        || tags
            .parent_id
            .is_some_and(|parent| scope.collection_ids.contains(&parent))
        || !scope.term_ids.is_disjoint(&tags.term_ids)
}

/// Scope matching with the site-wide suppression list applied on top.
#[derive(Debug, Clone, Default)]
pub struct ScopeMatcher {
    suppressed: BTreeSet<SubscriberEmail>,
}

impl ScopeMatcher {
    pub fn new(suppressed: impl IntoIterator<Item = SubscriberEmail>) -> Self {
        Self {
            suppressed: suppressed.into_iter().collect(),
        }
    }

    pub fn is_suppressed(&self, email: &SubscriberEmail) -> bool {
        self.suppressed.contains(email)
    }

    pub fn approves(&self, subscriber: &Subscriber, tags: &ContentTags) -> bool {
        !self.is_suppressed(&subscriber.email) && matches(&subscriber.scope, tags)
    }
}
