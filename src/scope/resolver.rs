use std::collections::BTreeSet;

use crate::domain::{AuthorId, BlockReason, ContentId, ContentItem, ContentTags, PublishStatus};

/// Site-wide rules deciding which content may trigger notifications.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    pub excluded_posts: BTreeSet<ContentId>,
    pub excluded_authors: BTreeSet<AuthorId>,
    pub supported_types: BTreeSet<String>,
    pub allow_passwords: bool,
    pub allow_hidden: bool,
}

/// Derives the matchable tags of a content item, or the first reason it is blocked.
///
/// Checks run in a fixed order: existence, trash, publish status, password,
/// exclusion lists, content type, hidden flag.
pub fn resolve(item: Option<&ContentItem>, rules: &ExclusionRules) -> Result<ContentTags, BlockReason> {
    let item = item.ok_or(BlockReason::Deleted)?;

    match item.status {
        PublishStatus::Trash => return Err(BlockReason::Trashed),
        PublishStatus::Publish => {}
        _ => return Err(BlockReason::Unpublished),
    }

    if item.has_password && !rules.allow_passwords {
        return Err(BlockReason::Protected);
    }

    if item.excluded
        || rules.excluded_posts.contains(&item.id)
        || rules.excluded_authors.contains(&item.author_id)
    {
        return Err(BlockReason::Excluded);
    }

    if !rules.supported_types.contains(&item.content_type) {
        return Err(BlockReason::InvalidType);
    }

    if item.hidden && !rules.allow_hidden {
        return Err(BlockReason::Hidden);
    }

    Ok(ContentTags {
        content_type: item.content_type.clone(),
        parent_id: item.parent_id,
        term_ids: item.term_ids.clone(),
    })
}
