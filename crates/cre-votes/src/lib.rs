//! Votes and competition ranking for the content reconciliation engine.
//!
//! [`VoteLedger`] owns who voted for what. Plain likes are a toggle per
//! `(target, user)`. Contest votes add the single-active-vote rule: within
//! one contest post a user holds a vote on at most one entry.
//!
//! [`ranking`] orders a contest's entries by votes.

pub mod error;
pub mod ledger;
pub mod ranking;

pub use error::{VoteError, VoteResult};
pub use ledger::{ContestVote, ToggleOutcome, VoteLedger, VoteMode, VoteReceipt};
pub use ranking::{rank_entries, winners, RankedEntry};
