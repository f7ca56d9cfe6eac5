//! Comment reconciliation.
//!
//! Two sources describe the comments of a post. The rich source (A) carries
//! images but no stable identity; the authoritative source (B) carries
//! identity and votes but no images. [`CommentReconciler`] merges them into
//! one duplicate-free list, attaching each image to at most one comment.
//!
//! The merge is re-run on every reconciliation pass and is deterministic
//! given the same inputs.

pub mod matching;
pub mod merge;

pub use matching::{claim_matches, match_rank, MatchRank};
pub use merge::{synthetic_id, CommentReconciler, MergeReport};
