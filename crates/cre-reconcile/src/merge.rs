use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use cre_types::{Comment, ItemId, Origin, RichComment};

use crate::matching::{claim_matches, MatchRank};

/// Counts from one merge pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub matched_exact: usize,
    pub matched_content_only: usize,
    /// Rich comments no authoritative comment claimed.
    pub standalone: usize,
    pub duplicates_dropped: usize,
    /// Comments whose vote membership was taken from the previous snapshot.
    pub carried_forward: usize,
}

/// Merges the comment sources of one post.
#[derive(Clone, Debug)]
pub struct CommentReconciler {
    post_id: ItemId,
}

impl CommentReconciler {
    pub fn new(post_id: impl Into<ItemId>) -> Self {
        Self {
            post_id: post_id.into(),
        }
    }

    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn merge(&self, rich: &[RichComment], authoritative: &[Comment], previous: &[Comment]) -> Vec<Comment> {
        self.merge_with_report(rich, authoritative, previous).0
    }

    /// Merge and report what happened.
    ///
    /// Authoritative comments come first, in their order, each with the
    /// image of the rich comment it claimed. Unclaimed rich comments follow
    /// under a synthetic id. Duplicates by id collapse onto the first
    /// position, preferring the record with an image. Empty vote membership
    /// is filled from `previous` when it knew better.
    pub fn merge_with_report(
        &self,
        rich: &[RichComment],
        authoritative: &[Comment],
        previous: &[Comment],
    ) -> (Vec<Comment>, MergeReport) {
        let mut report = MergeReport::default();
        let claims = claim_matches(rich, authoritative);
        let mut claimed = vec![false; rich.len()];

        let mut emitted = Vec::with_capacity(authoritative.len() + rich.len());
        for (comment, claim) in authoritative.iter().zip(claims) {
            let mut merged = comment.clone();
            if let Some((index, rank)) = claim {
                claimed[index] = true;
                match rank {
                    MatchRank::Exact => report.matched_exact += 1,
                    MatchRank::ContentOnly => report.matched_content_only += 1,
                }
                merged.image_ref = rich[index].image_ref.clone().or(merged.image_ref);
            }
            emitted.push(merged);
        }
        for (r, _) in rich.iter().zip(&claimed).filter(|(_, claimed)| !**claimed) {
            report.standalone += 1;
            emitted.push(self.standalone(r));
        }

        let mut merged = dedup_by_id(emitted, &mut report);
        carry_forward(&mut merged, previous, &mut report);

        debug!(
            post_id = %self.post_id,
            exact = report.matched_exact,
            content_only = report.matched_content_only,
            standalone = report.standalone,
            duplicates = report.duplicates_dropped,
            carried = report.carried_forward,
            "comments merged"
        );
        (merged, report)
    }

    fn standalone(&self, rich: &RichComment) -> Comment {
        Comment {
            id: synthetic_id(rich),
            post_id: self.post_id.clone(),
            origin: Origin::Remote,
            author_id: rich.author_id.clone().unwrap_or_default(),
            author: rich.author.clone(),
            content: rich.content.clone(),
            image_ref: rich.image_ref.clone(),
            like_count: 0,
            liked_by: Default::default(),
            created_at: rich.created_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

/// Stable id for a rich comment without identity: `rich-` and the first 16
/// hex digits of a BLAKE3 hash over author, trimmed content and image.
pub fn synthetic_id(rich: &RichComment) -> ItemId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(rich.author.as_bytes());
    hasher.update(&[0]);
    hasher.update(rich.content.trim().as_bytes());
    hasher.update(&[0]);
    hasher.update(rich.image_ref.as_deref().unwrap_or_default().as_bytes());
    let hash = hasher.finalize();
    format!("rich-{}", hex::encode(&hash.as_bytes()[..8]))
}

fn dedup_by_id(emitted: Vec<Comment>, report: &mut MergeReport) -> Vec<Comment> {
    let mut position: HashMap<ItemId, usize> = HashMap::new();
    let mut out: Vec<Comment> = Vec::with_capacity(emitted.len());
    for comment in emitted {
        match position.get(&comment.id) {
            Some(&i) => {
                report.duplicates_dropped += 1;
                if out[i].image_ref.is_none() && comment.image_ref.is_some() {
                    out[i] = comment;
                }
            }
            None => {
                position.insert(comment.id.clone(), out.len());
                out.push(comment);
            }
        }
    }
    out
}

fn carry_forward(merged: &mut [Comment], previous: &[Comment], report: &mut MergeReport) {
    if previous.is_empty() {
        return;
    }
    let previous: HashMap<&str, &Comment> = previous.iter().map(|c| (c.id.as_str(), c)).collect();
    for comment in merged.iter_mut().filter(|c| c.liked_by.is_empty()) {
        if let Some(prev) = previous.get(comment.id.as_str()).filter(|p| !p.liked_by.is_empty()) {
            comment.set_liked_by(prev.liked_by.clone());
            report.carried_forward += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rich(author: &str, content: &str, image: Option<&str>) -> RichComment {
        RichComment {
            author: author.into(),
            author_id: None,
            content: content.into(),
            image_ref: image.map(str::to_string),
            created_at: None,
        }
    }

    fn comment(id: &str, author: &str, content: &str, liked_by: &[&str]) -> Comment {
        let mut c = Comment {
            id: id.into(),
            post_id: "p1".into(),
            origin: Origin::Remote,
            author_id: format!("id-{author}"),
            author: author.into(),
            content: content.into(),
            image_ref: None,
            like_count: 0,
            liked_by: Default::default(),
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        };
        c.set_liked_by(liked_by.iter().map(|u| u.to_string()).collect());
        c
    }

    fn reconciler() -> CommentReconciler {
        CommentReconciler::new("p1")
    }

    #[test]
    fn images_attach_to_identities() {
        let a = vec![
            rich("Ada", "[contest-entry]", Some("https://host/uploads/a.png")),
            rich("Bob", "[contest-entry]", Some("https://host/uploads/b.png")),
        ];
        let b = vec![
            comment("10", "Bob", "[contest-entry]", &["u1"]),
            comment("11", "Ada", "[contest-entry]", &[]),
        ];
        let (merged, report) = reconciler().merge_with_report(&a, &b, &[]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "10");
        assert_eq!(merged[0].image_ref.as_deref(), Some("https://host/uploads/b.png"));
        assert_eq!(merged[0].like_count, 1);
        assert_eq!(merged[1].image_ref.as_deref(), Some("https://host/uploads/a.png"));
        assert_eq!(report.matched_exact, 2);
        assert_eq!(report.standalone, 0);
    }

    #[test]
    fn identical_text_does_not_share_one_image() {
        let a = vec![rich("Ada", "wow", Some("https://host/uploads/a.png"))];
        let b = vec![comment("1", "Ada", "wow", &[]), comment("2", "Ada", "wow", &[])];
        let merged = reconciler().merge(&a, &b, &[]);
        assert_eq!(merged.iter().filter(|c| c.image_ref.is_some()).count(), 1);
    }

    #[test]
    fn unclaimed_rich_comments_stand_alone() {
        let a = vec![rich("Ada", "just posted", Some("https://host/uploads/n.png"))];
        let merged = reconciler().merge(&a, &[], &[]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].id.starts_with("rich-"));
        assert_eq!(merged[0].id.len(), "rich-".len() + 16);
        assert_eq!(merged[0].post_id, "p1");
        assert_eq!(merged[0].origin, Origin::Remote);
    }

    #[test]
    fn synthetic_ids_are_stable_and_distinct() {
        let a = rich("Ada", "x", Some("i.png"));
        assert_eq!(synthetic_id(&a), synthetic_id(&a.clone()));
        assert_ne!(synthetic_id(&a), synthetic_id(&rich("Ada", "x", Some("j.png"))));
        assert_eq!(synthetic_id(&a), synthetic_id(&rich("Ada", " x ", Some("i.png"))));
    }

    #[test]
    fn duplicates_prefer_the_record_with_an_image() {
        let a = vec![rich("Ada", "pic", Some("https://host/uploads/p.png"))];
        let standalone_id = synthetic_id(&a[0]);
        let b = vec![comment(&standalone_id, "Zed", "other", &[])];
        let (merged, report) = reconciler().merge_with_report(&a, &b, &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "pic");
        assert!(merged[0].image_ref.is_some());
        assert_eq!(report.duplicates_dropped, 1);
    }

    #[test]
    fn membership_carries_forward_when_omitted() {
        let previous = vec![comment("1", "Ada", "hi", &["me"])];
        let fresh = vec![comment("1", "Ada", "hi", &[])];
        let (merged, report) = reconciler().merge_with_report(&[], &fresh, &previous);
        assert!(merged[0].liked_by.contains("me"));
        assert_eq!(merged[0].like_count, 1);
        assert_eq!(report.carried_forward, 1);
    }

    #[test]
    fn fresh_membership_wins_over_previous() {
        let previous = vec![comment("1", "Ada", "hi", &["me"])];
        let fresh = vec![comment("1", "Ada", "hi", &["you"])];
        let merged = reconciler().merge(&[], &fresh, &previous);
        assert!(!merged[0].liked_by.contains("me"));
        assert_eq!(merged[0].like_count, 1);
    }

    fn arb_inputs() -> impl Strategy<Value = (Vec<RichComment>, Vec<Comment>)> {
        let a = proptest::collection::vec((0u8..3, 0u8..3, proptest::option::of(0u8..4)), 0..10);
        let b = proptest::collection::vec((0u8..3, 0u8..3, proptest::collection::vec(0u8..3, 0..3)), 0..10);
        (a, b).prop_map(|(a, b)| {
            let a = a
                .into_iter()
                .map(|(who, what, img)| {
                    let image = img.map(|i| format!("https://host/uploads/{i}.png"));
                    rich(&format!("u{who}"), &format!("c{what}"), image.as_deref())
                })
                .collect();
            let b = b
                .into_iter()
                .enumerate()
                .map(|(i, (who, what, likes))| {
                    let likes: Vec<String> = likes.iter().map(|l| format!("v{l}")).collect();
                    let likes: Vec<&str> = likes.iter().map(String::as_str).collect();
                    comment(&i.to_string(), &format!("u{who}"), &format!("c{what}"), &likes)
                })
                .collect();
            (a, b)
        })
    }

    proptest! {
        #[test]
        fn merge_is_idempotent((a, b) in arb_inputs()) {
            let r = reconciler();
            let first = r.merge(&a, &b, &[]);
            let second = r.merge(&a, &b, &first);
            let shape = |v: &[Comment]| -> Vec<(String, Option<String>)> {
                v.iter().map(|c| (c.id.clone(), c.image_ref.clone())).collect()
            };
            prop_assert_eq!(shape(&first), shape(&second));
        }

        #[test]
        fn merged_ids_are_unique((a, b) in arb_inputs()) {
            let merged = reconciler().merge(&a, &b, &[]);
            let mut ids = std::collections::HashSet::new();
            for c in &merged {
                prop_assert!(ids.insert(c.id.clone()));
            }
        }

        #[test]
        fn like_count_matches_membership((a, b) in arb_inputs()) {
            let first = reconciler().merge(&a, &b, &[]);
            for c in reconciler().merge(&a, &b, &first) {
                prop_assert_eq!(c.like_count, c.liked_by.len() as u64);
            }
        }
    }
}
