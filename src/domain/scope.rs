use std::collections::BTreeSet;

use super::{ContentId, TermId};

/// The interest criteria a subscriber registered for.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SubscriberScope {
    pub everything: bool,
    pub content_types: BTreeSet<String>,
    pub collection_ids: BTreeSet<ContentId>,
    pub term_ids: BTreeSet<TermId>,
}

/// Matchable tags derived from a content item at queue-build time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTags {
    pub content_type: String,
    pub parent_id: Option<ContentId>,
    pub term_ids: BTreeSet<TermId>,
}

/// Constraints applied to a scope before it is stored.
#[derive(Debug, Clone)]
pub struct ScopeRules {
    pub supported_types: BTreeSet<String>,
    pub max_per_term: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("{0} is not a supported content type.")]
    UnsupportedType(String),
    #[error("At most {limit} terms can be subscribed to, got {actual}.")]
    TooManyTerms { limit: usize, actual: usize },
    #[error("The scope does not select anything.")]
    Empty,
}

impl SubscriberScope {
    pub fn everything() -> Self {
        Self {
            everything: true,
            ..Default::default()
        }
    }

    pub fn parse(
        everything: bool,
        content_types: impl IntoIterator<Item = String>,
        collection_ids: impl IntoIterator<Item = ContentId>,
        term_ids: impl IntoIterator<Item = TermId>,
        rules: &ScopeRules,
    ) -> Result<Self, ScopeError> {
        let content_types: BTreeSet<String> = content_types
            .into_iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        if let Some(unsupported) = content_types
            .iter()
            .find(|t| !rules.supported_types.contains(*t))
        {
            return Err(ScopeError::UnsupportedType(unsupported.clone()));
        }

        let collection_ids: BTreeSet<ContentId> =
            collection_ids.into_iter().filter(|id| *id > 0).collect();
        let term_ids: BTreeSet<TermId> = term_ids.into_iter().filter(|id| *id > 0).collect();
        if term_ids.len() > rules.max_per_term {
            return Err(ScopeError::TooManyTerms {
                limit: rules.max_per_term,
                actual: term_ids.len(),
            });
        }

        let scope = Self {
            everything,
            content_types,
            collection_ids,
            term_ids,
        };
        if scope.is_empty() {
            return Err(ScopeError::Empty);
        }
        Ok(scope)
    }

    pub fn is_empty(&self) -> bool {
        !self.everything
            && self.content_types.is_empty()
            && self.collection_ids.is_empty()
            && self.term_ids.is_empty()
    }
}
