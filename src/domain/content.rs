use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

pub type ContentId = i64;
pub type TermId = i64;
pub type AuthorId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Publish,
    Future,
    Draft,
    Pending,
    Private,
    Trash,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Publish => "publish",
            PublishStatus::Future => "future",
            PublishStatus::Draft => "draft",
            PublishStatus::Pending => "pending",
            PublishStatus::Private => "private",
            PublishStatus::Trash => "trash",
        }
    }
}

impl TryFrom<String> for PublishStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "publish" => Ok(Self::Publish),
            "future" => Ok(Self::Future),
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "private" => Ok(Self::Private),
            "trash" => Ok(Self::Trash),
            other => Err(format!("{other} is not a known publish status.")),
        }
    }
}

/// A piece of content as read from the content store.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: ContentId,
    pub content_type: String,
    pub status: PublishStatus,
    pub has_password: bool,
    pub hidden: bool,
    /// Per-item opt-out set by an editor.
    pub excluded: bool,
    pub author_id: AuthorId,
    pub author_name: String,
    pub title: String,
    pub excerpt: String,
    pub link: String,
    pub thumbnail: Option<String>,
    pub parent_id: Option<ContentId>,
    pub parent_title: Option<String>,
    pub parent_link: Option<String>,
    pub term_ids: BTreeSet<TermId>,
    pub published_at: DateTime<Utc>,
}

/// Why a notification cannot be sent right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    Unpublished,
    Protected,
    InvalidType,
    Excluded,
    Hidden,
    Deleted,
    Trashed,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Unpublished => "unpublished",
            BlockReason::Protected => "protected",
            BlockReason::InvalidType => "invalid-type",
            BlockReason::Excluded => "excluded",
            BlockReason::Hidden => "hidden",
            BlockReason::Deleted => "deleted",
            BlockReason::Trashed => "trashed",
        }
    }
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
