use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ItemId, UserId};

/// Whether an entity has been confirmed by the authoritative source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    /// Confirmed by the remote source.
    #[default]
    Remote,
    /// Created or edited on-device and not yet confirmed.
    PendingLocal,
}

impl Origin {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingLocal)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::PendingLocal => write!(f, "pending"),
        }
    }
}

/// Fields that identify a post independently of its id.
///
/// Used to recognise a pending create that already landed remotely (the
/// request timed out after the server committed it).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ContentFingerprint {
    pub author_id: UserId,
    pub category: String,
    pub title: String,
    pub content: String,
}

impl ContentFingerprint {
    pub fn new(author_id: &str, category: &str, title: &str, content: &str) -> Self {
        Self {
            author_id: author_id.to_string(),
            category: category.trim().to_string(),
            title: title.trim().to_string(),
            content: content.trim().to_string(),
        }
    }
}

/// A post or competition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: ItemId,
    pub origin: Origin,
    pub author_id: UserId,
    pub author: String,
    pub category: String,
    pub title: String,
    pub content: String,
    /// Canonical image URLs, first-seen order, no duplicates.
    pub images: Vec<String>,
    pub like_count: u64,
    pub liked_by: BTreeSet<UserId>,
    pub comment_count: u64,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    /// Replace the like membership; the count follows the membership.
    pub fn set_liked_by(&mut self, liked_by: BTreeSet<UserId>) {
        self.liked_by = liked_by;
        self.like_count = self.liked_by.len() as u64;
    }

    /// Flip `user`'s like. Returns `true` if the user now likes the item.
    pub fn toggle_like(&mut self, user: &str) -> bool {
        let liked = if self.liked_by.remove(user) {
            false
        } else {
            self.liked_by.insert(user.to_string());
            true
        };
        self.like_count = self.liked_by.len() as u64;
        liked
    }

    pub fn is_pending(&self) -> bool {
        self.origin.is_pending()
    }

    pub fn fingerprint(&self) -> ContentFingerprint {
        ContentFingerprint::new(&self.author_id, &self.category, &self.title, &self.content)
    }
}

/// A comment under a post. Contest entries are comments with an image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: ItemId,
    pub post_id: ItemId,
    pub origin: Origin,
    pub author_id: UserId,
    pub author: String,
    pub content: String,
    pub image_ref: Option<String>,
    pub like_count: u64,
    pub liked_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Comment {
    /// Entries are the comments that carry an image.
    pub fn is_entry(&self) -> bool {
        self.image_ref.is_some()
    }

    pub fn set_liked_by(&mut self, liked_by: BTreeSet<UserId>) {
        self.liked_by = liked_by;
        self.like_count = self.liked_by.len() as u64;
    }

    pub fn is_pending(&self) -> bool {
        self.origin.is_pending()
    }
}

/// A comment as reported by the image-bearing source: it has an image
/// reference but no stable identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RichComment {
    pub author: String,
    pub author_id: Option<UserId>,
    pub content: String,
    pub image_ref: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}
