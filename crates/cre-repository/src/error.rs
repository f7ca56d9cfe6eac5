use thiserror::Error;

use cre_types::{ItemId, TypeError};
use cre_votes::VoteError;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("invalid input: {0}")]
    Validation(#[from] TypeError),

    #[error("already voted for entry {existing_entry} in contest {post_id}")]
    Conflict {
        post_id: ItemId,
        existing_entry: ItemId,
    },

    #[error("entry {entry_id} is not part of contest {post_id}")]
    UnknownEntry { post_id: ItemId, entry_id: ItemId },

    #[error("rejected by remote: {0}")]
    Rejected(String),

    #[error("item not found: {0}")]
    NotFound(ItemId),

    #[error("journal error: {0}")]
    Journal(#[from] cre_journal::JournalError),

    #[error("config error: {0}")]
    Config(String),
}

impl From<VoteError> for RepoError {
    fn from(e: VoteError) -> Self {
        match e {
            VoteError::Conflict {
                post_id,
                existing_entry,
            } => Self::Conflict {
                post_id,
                existing_entry,
            },
            VoteError::UnknownEntry { post_id, entry_id } => Self::UnknownEntry { post_id, entry_id },
            VoteError::Rejected(reason) => Self::Rejected(reason),
        }
    }
}

pub type RepoResult<T> = Result<T, RepoError>;
