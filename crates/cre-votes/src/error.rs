use thiserror::Error;

use cre_types::ItemId;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VoteError {
    /// The user already holds a vote on another entry of the contest.
    #[error("already voted for entry {existing_entry} in contest {post_id}")]
    Conflict {
        post_id: ItemId,
        existing_entry: ItemId,
    },

    #[error("entry {entry_id} is not part of contest {post_id}")]
    UnknownEntry { post_id: ItemId, entry_id: ItemId },

    /// The remote source refused the vote; local state was rolled back.
    #[error("vote rejected by remote: {0}")]
    Rejected(String),
}

pub type VoteResult<T> = Result<T, VoteError>;
