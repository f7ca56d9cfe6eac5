//! Competition entry ranking.
//!
//! Entries are ordered by votes (most first), then by submission time
//! (earliest first), then by id so the order is total. Ranks are dense:
//! entries tied on both votes and submission time share a rank, and the
//! next distinct entry gets the following rank.

use std::cmp::Ordering;

use serde::Serialize;

use cre_types::Comment;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RankedEntry {
    /// 1-based.
    pub rank: u32,
    pub entry: Comment,
}

/// Rank the entries among `comments`. Comments without an image are not
/// entries and are left out.
pub fn rank_entries<I>(comments: I) -> Vec<RankedEntry>
where
    I: IntoIterator<Item = Comment>,
{
    let mut entries: Vec<Comment> = comments.into_iter().filter(Comment::is_entry).collect();
    entries.sort_by(compare);

    let mut ranked = Vec::with_capacity(entries.len());
    let mut rank = 0u32;
    let mut previous = None;
    for entry in entries {
        let key = (entry.like_count, entry.created_at);
        if previous != Some(key) {
            rank += 1;
            previous = Some(key);
        }
        ranked.push(RankedEntry { rank, entry });
    }
    ranked
}

/// The entries sharing first place.
pub fn winners(ranked: &[RankedEntry]) -> impl Iterator<Item = &RankedEntry> {
    ranked.iter().take_while(|r| r.rank == 1)
}

fn compare(a: &Comment, b: &Comment) -> Ordering {
    b.like_count
        .cmp(&a.like_count)
        .then(a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}
