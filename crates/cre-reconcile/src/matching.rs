use std::collections::HashMap;

use serde::Serialize;

use cre_types::{Comment, RichComment};

/// How specifically a rich comment matches an authoritative one. Variants
/// are ordered by precedence: `Exact` beats `ContentOnly`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum MatchRank {
    /// Same trimmed content, different or unknown author.
    ContentOnly,
    /// Same trimmed content and same author.
    Exact,
}

/// Rank the match between a rich comment and an authoritative one, or
/// `None` when their trimmed contents differ. Content comparison is
/// case-sensitive.
pub fn match_rank(rich: &RichComment, comment: &Comment) -> Option<MatchRank> {
    if rich.content.trim() != comment.content.trim() {
        return None;
    }
    let same_name = rich.author == comment.author;
    let same_id = rich
        .author_id
        .as_deref()
        .is_some_and(|id| !id.is_empty() && id == comment.author_id);
    if same_name || same_id {
        Some(MatchRank::Exact)
    } else {
        Some(MatchRank::ContentOnly)
    }
}

/// For each authoritative comment, in order, the index of the rich comment
/// it claims and how.
///
/// A comment claims the first unclaimed rich comment of the highest rank.
/// A claimed rich comment is never claimed again.
pub fn claim_matches(rich: &[RichComment], comments: &[Comment]) -> Vec<Option<(usize, MatchRank)>> {
    let mut by_content: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, r) in rich.iter().enumerate() {
        by_content.entry(r.content.trim()).or_default().push(i);
    }

    let mut claimed = vec![false; rich.len()];
    comments
        .iter()
        .map(|comment| {
            let candidates = by_content.get(comment.content.trim())?;
            let (index, rank) = candidates
                .iter()
                .filter(|&&i| !claimed[i])
                .filter_map(|&i| match_rank(&rich[i], comment).map(|rank| (i, rank)))
                .fold(None, |best: Option<(usize, MatchRank)>, (i, rank)| match best {
                    Some((_, best_rank)) if best_rank >= rank => best,
                    _ => Some((i, rank)),
                })?;
            claimed[index] = true;
            Some((index, rank))
        })
        .collect()
}
