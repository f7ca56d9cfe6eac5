use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::draft::{CommentDraft, EditPatch, PostDraft};
use crate::ids::{ItemId, LocalId};

/// What a like/vote applies to. Posts and comments are liked through
/// different remote endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VoteTarget {
    Post(ItemId),
    Comment(ItemId),
}

impl VoteTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Post(id) | Self::Comment(id) => id,
        }
    }

    /// The same kind of target with a different id.
    pub fn with_id(&self, id: impl Into<ItemId>) -> Self {
        match self {
            Self::Post(_) => Self::Post(id.into()),
            Self::Comment(_) => Self::Comment(id.into()),
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post(id) => write!(f, "post:{id}"),
            Self::Comment(id) => write!(f, "comment:{id}"),
        }
    }
}

/// Classification of pending writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteKind {
    CreatePost,
    CreateComment,
    Like,
    Unlike,
    Delete,
    Edit,
}

impl fmt::Display for WriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreatePost => "CreatePost",
            Self::CreateComment => "CreateComment",
            Self::Like => "Like",
            Self::Unlike => "Unlike",
            Self::Delete => "Delete",
            Self::Edit => "Edit",
        };
        write!(f, "{s}")
    }
}

/// Data carried by a pending write. The variant follows the [`WriteKind`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WritePayload {
    None,
    Post(PostDraft),
    Comment(CommentDraft),
    Vote(VoteTarget),
    Edit(EditPatch),
}

/// A write that has not been confirmed by the remote source.
///
/// `target_id` names the entity the write affects: the post itself for
/// `CreatePost` (its local id), the parent post for `CreateComment`, the
/// liked/deleted/edited entity otherwise.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub local_id: LocalId,
    pub kind: WriteKind,
    pub payload: WritePayload,
    pub target_id: ItemId,
    pub created_at: DateTime<Utc>,
}

impl PendingWrite {
    fn new(kind: WriteKind, payload: WritePayload, target_id: ItemId) -> Self {
        Self {
            local_id: LocalId::new(),
            kind,
            payload,
            target_id,
            created_at: Utc::now(),
        }
    }

    pub fn create_post(draft: PostDraft) -> Self {
        let mut write = Self::new(WriteKind::CreatePost, WritePayload::Post(draft), String::new());
        write.target_id = write.local_id.to_string();
        write
    }

    pub fn create_comment(draft: CommentDraft) -> Self {
        let target = draft.post_id.clone();
        Self::new(WriteKind::CreateComment, WritePayload::Comment(draft), target)
    }

    /// A like (`liked == true`) or unlike of `target`.
    pub fn vote(target: VoteTarget, liked: bool) -> Self {
        let kind = if liked { WriteKind::Like } else { WriteKind::Unlike };
        let id = target.id().to_string();
        Self::new(kind, WritePayload::Vote(target), id)
    }

    pub fn delete(target_id: impl Into<ItemId>) -> Self {
        Self::new(WriteKind::Delete, WritePayload::None, target_id.into())
    }

    pub fn edit(target_id: impl Into<ItemId>, patch: EditPatch) -> Self {
        Self::new(WriteKind::Edit, WritePayload::Edit(patch), target_id.into())
    }

    /// Whether this write concerns `id`, either as its own local id or as
    /// its target.
    pub fn touches(&self, id: &str) -> bool {
        self.target_id == id || self.local_id.to_string() == id
    }
}
