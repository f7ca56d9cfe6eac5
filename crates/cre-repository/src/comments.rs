//! Comments, contest entries and votes of a [`PostRepository`].

use std::collections::HashSet;

use tracing::{debug, info, warn};

use cre_journal::{JournalBackend, Materialized};
use cre_reconcile::{synthetic_id, CommentReconciler};
use cre_remote::RemoteSource;
use cre_types::{
    Comment, CommentDraft, Origin, PendingWrite, RichComment, TypeError, VoteTarget, WriteKind,
    WritePayload,
};
use cre_votes::{ContestVote, RankedEntry, ToggleOutcome, VoteMode};

use crate::error::RepoResult;
use crate::repository::PostRepository;

impl<R: RemoteSource, B: JournalBackend> PostRepository<R, B> {
    // ---- Comments ----

    /// The comments of a post: both remote sources merged, followed by the
    /// comments still pending locally.
    ///
    /// Contest entries found here are registered for voting. When either
    /// source fails the last merged snapshot is served instead.
    pub async fn comments(&self, post_id: &str) -> Vec<Comment> {
        let post_id = self.resolve_id(post_id);
        if self.is_pending_local(&post_id) {
            return self.pending_comments(&post_id);
        }

        let (detail, rich) = tokio::join!(
            self.remote.get_item_detail(&post_id),
            self.remote.list_comments_rich(&post_id)
        );
        let (detail, rich) = match (detail, rich) {
            (Ok(detail), Ok(rich)) => (detail, rich),
            (Err(e), _) | (_, Err(e)) => {
                warn!(%post_id, error = %e, "comment fetch failed; serving last snapshot");
                return self.snapshot_with_pending(&post_id);
            }
        };

        let authoritative: Vec<Comment> = detail
            .comments
            .into_iter()
            .map(|payload| self.normalizer.comment(&post_id, payload))
            .filter(|c| !c.id.is_empty())
            .collect();
        let rich: Vec<RichComment> = rich
            .into_iter()
            .map(|payload| self.normalizer.rich_comment(payload))
            .collect();
        let previous = self.snapshot(&post_id);

        let mut merged = CommentReconciler::new(post_id.clone()).merge(&rich, &authoritative, &previous);
        self.confirm_landed_comments(&post_id, &merged);
        self.apply_comment_votes(&post_id, &mut merged);

        let count = merged.len() as u64;
        self.write_view().snapshots.insert(post_id.clone(), merged.clone());
        self.update_view_item(&post_id, |item| item.comment_count = count);

        merged.extend(self.pending_comments(&post_id));
        merged
    }

    /// Add a comment. Never fails except on validation: when the remote
    /// source cannot take the comment it is journaled and returned as
    /// pending-local.
    pub async fn create_comment(&self, draft: CommentDraft) -> RepoResult<Comment> {
        draft.validate()?;
        let mut draft = draft;
        draft.post_id = self.resolve_id(&draft.post_id);
        draft.image = match draft.image.as_deref().map(str::trim).filter(|raw| !raw.is_empty()) {
            Some(raw) => Some(self.resolver().resolve_str(raw).ok_or_else(|| TypeError::Validation {
                field: "image",
                reason: format!("unrecognised image reference {raw:?}"),
            })?),
            None => None,
        };
        let post_id = draft.post_id.clone();

        if self.is_pending_local(&post_id) {
            debug!(%post_id, "commenting on a pending post; journaling");
            return Ok(self.journal_comment(draft));
        }

        let created = self
            .remote
            .create_comment(&post_id, &draft.content, draft.image.as_deref())
            .await;
        let comment = match created {
            Ok(payload) => {
                let comment = self.landed_comment(&draft, self.normalizer.comment(&post_id, payload));
                info!(%post_id, id = %comment.id, entry = comment.is_entry(), "comment created");
                self.record_comment(&comment);
                comment
            }
            Err(e) => {
                warn!(%post_id, error = %e, "comment create failed; journaling");
                self.journal_comment(draft)
            }
        };
        Ok(comment)
    }

    /// Submit a contest entry: an image comment carrying the entry marker.
    pub async fn submit_entry(&self, post_id: &str, author: &str, image: &str) -> RepoResult<Comment> {
        self.create_comment(CommentDraft {
            post_id: post_id.to_string(),
            author_id: self.config.user_id.clone(),
            author: author.to_string(),
            content: self.config.entry_marker.clone(),
            image: Some(image.to_string()),
        })
        .await
    }

    /// Entries of a contest post ranked by votes, from the last snapshot.
    pub fn rank_entries(&self, post_id: &str) -> Vec<RankedEntry> {
        cre_votes::rank_entries(self.snapshot(&self.resolve_id(post_id)))
    }

    // ---- Votes ----

    pub async fn toggle_like(&self, target: &VoteTarget, user: &str) -> ToggleOutcome {
        self.vote(target, user, None).await
    }

    /// A no-op when `user` already likes `target`.
    pub async fn like(&self, target: &VoteTarget, user: &str) -> ToggleOutcome {
        self.vote(target, user, Some(true)).await
    }

    /// A no-op when `user` does not like `target`.
    pub async fn unlike(&self, target: &VoteTarget, user: &str) -> ToggleOutcome {
        self.vote(target, user, Some(false)).await
    }

    async fn vote(&self, target: &VoteTarget, user: &str, liked: Option<bool>) -> ToggleOutcome {
        let target = target.with_id(self.resolve_id(target.id()));
        if let VoteTarget::Comment(entry_id) = &target {
            if let Some(post_id) = self.votes.contest_of(entry_id) {
                return self.vote_entry(&post_id, entry_id, user, liked).await;
            }
        }
        let _guard = self.write_locks.lock(target.id()).await;

        let outcome = if self.is_pending_local(target.id()) {
            let outcome = match liked {
                Some(liked) => self.votes.set_vote(&target, user, liked),
                None => self.votes.toggle(&target, user),
            };
            if outcome.changed {
                self.journal_vote(PendingWrite::vote(target.clone(), outcome.liked));
            }
            outcome
        } else {
            let receipt = match liked {
                Some(liked) => self.votes.set_synced(&self.remote, &target, user, liked).await,
                None => self.votes.toggle_synced(&self.remote, &target, user).await,
            };
            for write in receipt.pending {
                self.journal_vote(write);
            }
            receipt.outcome
        };

        self.reflect_vote(&target);
        debug!(%target, user, liked = outcome.liked, count = outcome.like_count, "vote applied");
        outcome
    }

    /// A like on a contest entry counts as a contest vote, under the
    /// configured [`VoteMode`]. A refused or rejected vote leaves the entry
    /// unchanged.
    async fn vote_entry(&self, post_id: &str, entry_id: &str, user: &str, liked: Option<bool>) -> ToggleOutcome {
        let changed = match self.contest_vote(post_id, entry_id, user, self.config.vote_mode, liked).await {
            Ok(vote) => vote.changed,
            Err(e) => {
                warn!(post_id, entry_id, user, error = %e, "like on contest entry not applied");
                false
            }
        };
        let target = VoteTarget::Comment(entry_id.to_string());
        ToggleOutcome {
            liked: self.votes.liked_by(&target).contains(user),
            like_count: self.votes.like_count(&target),
            changed,
        }
    }

    /// Vote for an entry of a contest post, keeping at most one active vote
    /// per user. Loads the contest's comments first if its entries are not
    /// known yet.
    pub async fn cast_contest_vote(
        &self,
        post_id: &str,
        entry_id: &str,
        user: &str,
        mode: VoteMode,
    ) -> RepoResult<ContestVote> {
        let post_id = self.resolve_id(post_id);
        let entry_id = self.resolve_id(entry_id);
        if self.votes.entries(&post_id).is_empty() {
            debug!(%post_id, "contest entries unknown; loading comments");
            self.comments(&post_id).await;
        }
        self.contest_vote(&post_id, &entry_id, user, mode, None).await
    }

    async fn contest_vote(
        &self,
        post_id: &str,
        entry_id: &str,
        user: &str,
        mode: VoteMode,
        want: Option<bool>,
    ) -> RepoResult<ContestVote> {
        let result = match want {
            Some(liked) => {
                self.votes
                    .set_contest_vote(&self.remote, post_id, entry_id, user, liked, mode)
                    .await
            }
            None => {
                self.votes
                    .cast_contest_vote(&self.remote, post_id, entry_id, user, mode)
                    .await
            }
        };
        for entry in self.votes.entries(post_id) {
            self.reflect_vote(&VoteTarget::Comment(entry));
        }
        let vote = result?;
        for write in vote.pending.iter().cloned() {
            self.journal_vote(write);
        }
        Ok(vote)
    }

    // ---- Internals ----

    pub(crate) fn snapshot(&self, post_id: &str) -> Vec<Comment> {
        self.read_view().snapshots.get(post_id).cloned().unwrap_or_default()
    }

    fn snapshot_with_pending(&self, post_id: &str) -> Vec<Comment> {
        let mut comments = self.snapshot(post_id);
        comments.extend(self.pending_comments(post_id));
        comments
    }

    fn pending_comments(&self, post_id: &str) -> Vec<Comment> {
        self.journal
            .materialize()
            .into_iter()
            .filter_map(|m| match m {
                Materialized::Comment(c) if c.post_id == post_id => Some(c),
                _ => None,
            })
            .map(|mut c| {
                if let Some(liked_by) = self.votes.membership(&VoteTarget::Comment(c.id.clone())) {
                    c.set_liked_by(liked_by);
                }
                c
            })
            .collect()
    }

    fn journal_comment(&self, draft: CommentDraft) -> Comment {
        let write = PendingWrite::create_comment(draft.clone());
        let comment = Comment {
            id: write.local_id.to_string(),
            post_id: draft.post_id,
            origin: Origin::PendingLocal,
            author_id: draft.author_id,
            author: draft.author,
            content: draft.content,
            image_ref: draft.image,
            like_count: 0,
            liked_by: Default::default(),
            created_at: write.created_at,
        };
        self.journal.append(write);
        self.update_view_item(&comment.post_id, |item| item.comment_count += 1);
        comment
    }

    /// The comment the remote source created from `draft`. Its image is the
    /// one sent; a missing id is derived from the content.
    pub(crate) fn landed_comment(&self, draft: &CommentDraft, mut comment: Comment) -> Comment {
        comment.image_ref = draft.image.clone();
        if comment.id.is_empty() {
            comment.id = synthetic_id(&RichComment {
                author: comment.author.clone(),
                author_id: Some(comment.author_id.clone()),
                content: comment.content.clone(),
                image_ref: comment.image_ref.clone(),
                created_at: None,
            });
        }
        comment
    }

    /// Put a confirmed comment into the snapshot of its post.
    pub(crate) fn record_comment(&self, comment: &Comment) {
        {
            let mut view = self.write_view();
            let snapshot = view.snapshots.entry(comment.post_id.clone()).or_default();
            if !snapshot.iter().any(|c| c.id == comment.id) {
                snapshot.push(comment.clone());
            }
        }
        self.update_view_item(&comment.post_id, |item| item.comment_count += 1);
        self.votes
            .observe(&VoteTarget::Comment(comment.id.clone()), comment.liked_by.clone());
        if comment.is_entry() {
            self.votes.add_entry(&comment.post_id, &comment.id);
        }
    }

    /// Pending comments that show up in a fetch have landed; confirm them
    /// instead of sending them again.
    fn confirm_landed_comments(&self, post_id: &str, merged: &[Comment]) {
        let mut taken: HashSet<&str> = HashSet::new();
        for write in self.journal.list_pending(Some(post_id)) {
            let (WriteKind::CreateComment, WritePayload::Comment(draft)) = (&write.kind, &write.payload) else {
                continue;
            };
            let Some(landed) = merged.iter().find(|c| {
                !taken.contains(c.id.as_str())
                    && c.author_id == draft.author_id
                    && c.content.trim() == draft.content.trim()
                    && c.image_ref == draft.image
            }) else {
                continue;
            };
            taken.insert(&landed.id);
            info!(local_id = %write.local_id, id = %landed.id, "pending comment already landed");
            self.journal.confirm(&write.local_id);
            self.adopt_confirmed(&write.local_id.to_string(), &landed.id);
        }
    }

    /// Register entries, observe complete memberships, re-apply the
    /// session user's pending votes and take membership from the ledger.
    fn apply_comment_votes(&self, post_id: &str, comments: &mut [Comment]) {
        self.votes.register_entries(post_id, comments);
        for c in comments
            .iter()
            .filter(|c| !c.is_entry() && c.liked_by.len() as u64 == c.like_count)
        {
            self.votes.observe(&VoteTarget::Comment(c.id.clone()), c.liked_by.clone());
        }

        let ids: HashSet<&str> = comments.iter().map(|c| c.id.as_str()).collect();
        for write in self.journal.list_pending(None) {
            if let WritePayload::Vote(target @ VoteTarget::Comment(id)) = &write.payload {
                if ids.contains(id.as_str()) {
                    self.votes
                        .set_vote(target, &self.config.user_id, write.kind == WriteKind::Like);
                }
            }
        }

        for c in comments.iter_mut() {
            if let Some(liked_by) = self.votes.membership(&VoteTarget::Comment(c.id.clone())) {
                c.set_liked_by(liked_by);
            }
        }
    }

    /// Journal a vote, or cancel the opposite vote still pending for the
    /// same target.
    pub(crate) fn journal_vote(&self, write: PendingWrite) {
        let WritePayload::Vote(target) = &write.payload else {
            return self.journal.append(write);
        };
        let opposite = self.journal.list_pending(Some(target.id())).into_iter().find(|w| {
            w.kind != write.kind && matches!(&w.payload, WritePayload::Vote(t) if t == target)
        });
        match opposite {
            Some(previous) => {
                debug!(%target, "pending vote cancelled out");
                self.journal.confirm(&previous.local_id);
            }
            None => self.journal.append(write),
        }
    }

    /// Copy the ledger's membership of `target` into the view.
    fn reflect_vote(&self, target: &VoteTarget) {
        let liked_by = self.votes.liked_by(target);
        match target {
            VoteTarget::Post(id) => {
                self.update_view_item(id, |item| item.set_liked_by(liked_by));
            }
            VoteTarget::Comment(id) => {
                let mut view = self.write_view();
                for comment in view
                    .snapshots
                    .values_mut()
                    .flat_map(|s| s.iter_mut())
                    .filter(|c| &c.id == id)
                {
                    comment.set_liked_by(liked_by.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cre_remote::{InMemoryRemote, RemoteError, RemoteOp};

    use super::*;
    use crate::error::RepoError;
    use crate::testing::{draft, repo_with};

    /// A contest post with two entries by other users.
    fn contest(remote: &InMemoryRemote) -> (String, String, String) {
        let post = remote.insert_item(&draft("contest", "Sunsets"));
        let e1 = remote.insert_comment(&post, "u2", "Bob", "[contest-entry]", Some("uploads/e1.png"));
        let e2 = remote.insert_comment(&post, "u3", "Cy", "[contest-entry]", Some("/uploads/e2.png"));
        (post, e1, e2)
    }

    fn comment_draft(post_id: &str, content: &str) -> CommentDraft {
        CommentDraft {
            post_id: post_id.into(),
            author_id: "u1".into(),
            author: "Ada".into(),
            content: content.into(),
            image: None,
        }
    }

    #[tokio::test]
    async fn comments_carry_identity_and_image() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        remote.insert_comment(&post, "u4", "Di", "nice!", None);
        let repo = repo_with(remote);

        let comments = repo.comments(&post).await;
        assert_eq!(comments.len(), 3);
        assert_eq!(comments[0].id, e1);
        assert_eq!(comments[0].image_ref.as_deref(), Some("https://host/uploads/e1.png"));
        assert_eq!(comments[1].id, e2);
        assert_eq!(comments[1].image_ref.as_deref(), Some("https://host/uploads/e2.png"));
        assert!(comments[2].image_ref.is_none());
        assert_eq!(repo.votes().entries(&post), vec![e1, e2]);
    }

    #[tokio::test]
    async fn failed_fetch_serves_last_snapshot() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, _, _) = contest(&remote);
        let repo = repo_with(remote.clone());
        let first = repo.comments(&post).await;

        remote.fail_next(RemoteOp::ListCommentsRich, RemoteError::Transient("timeout".into()));
        assert_eq!(repo.comments(&post).await, first);
    }

    #[tokio::test]
    async fn switching_contest_vote_moves_it() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        remote.set_likes(&VoteTarget::Comment(e1.clone()), &["u1"]);
        let repo = repo_with(remote.clone());

        let vote = repo
            .cast_contest_vote(&post, &e2, "u1", VoteMode::WithdrawPreviousAndVote)
            .await
            .unwrap();
        assert!(vote.voted);
        assert_eq!(vote.withdrawn, vec![e1.clone()]);

        assert!(!remote.liked_by(&VoteTarget::Comment(e1.clone())).contains("u1"));
        assert!(remote.liked_by(&VoteTarget::Comment(e2.clone())).contains("u1"));

        let comments = repo.comments(&post).await;
        let total: usize = comments.iter().filter(|c| c.liked_by.contains("u1")).count();
        assert_eq!(total, 1);
        assert_eq!(repo.votes().active_vote(&post, "u1"), Some(e2));
    }

    #[tokio::test]
    async fn refuse_mode_reports_existing_vote() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        remote.set_likes(&VoteTarget::Comment(e1.clone()), &["u1"]);
        let repo = repo_with(remote.clone());

        let err = repo
            .cast_contest_vote(&post, &e2, "u1", VoteMode::RefuseIfVoted)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict { existing_entry, .. } if existing_entry == e1));
        assert_eq!(remote.calls(RemoteOp::LikeComment), 0);
    }

    #[tokio::test]
    async fn rejected_contest_vote_restores_previous() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        remote.set_likes(&VoteTarget::Comment(e1.clone()), &["u1"]);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;

        remote.fail_next(RemoteOp::LikeComment, RemoteError::Rejected("closed".into()));
        let err = repo
            .cast_contest_vote(&post, &e2, "u1", VoteMode::WithdrawPreviousAndVote)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Rejected(_)));
        assert_eq!(repo.votes().active_vote(&post, "u1"), Some(e1.clone()));
        assert!(remote.liked_by(&VoteTarget::Comment(e1.clone())).contains("u1"));
        let snapshot = repo.comments(&post).await;
        assert!(snapshot.iter().find(|c| c.id == e1).unwrap().liked_by.contains("u1"));
        assert!(repo.journal().is_empty());
    }

    #[tokio::test]
    async fn offline_contest_vote_is_journaled() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, _, e2) = contest(&remote);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;

        remote.set_offline(true);
        let vote = repo
            .cast_contest_vote(&post, &e2, "u1", VoteMode::WithdrawPreviousAndVote)
            .await
            .unwrap();
        assert_eq!(vote.pending.len(), 1);
        assert_eq!(repo.pending_count(), 1);

        remote.set_offline(false);
        let report = repo.sync_pending().await;
        assert_eq!(report.confirmed, 1);
        assert!(remote.liked_by(&VoteTarget::Comment(e2)).contains("u1"));
    }

    #[tokio::test]
    async fn submitted_entries_are_ranked() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        remote.set_likes(&VoteTarget::Comment(e2.clone()), &["u5", "u6"]);
        remote.set_likes(&VoteTarget::Comment(e1.clone()), &["u5"]);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;

        let mine = repo.submit_entry(&post, "Ada", "uploads/mine.png").await.unwrap();
        assert_eq!(mine.origin, Origin::Remote);
        assert_eq!(mine.image_ref.as_deref(), Some("https://host/uploads/mine.png"));
        assert!(repo.votes().entries(&post).contains(&mine.id));

        let ranked = repo.rank_entries(&post);
        let order: Vec<(u32, &str)> = ranked.iter().map(|r| (r.rank, r.entry.id.as_str())).collect();
        assert_eq!(order, vec![(1, e2.as_str()), (2, e1.as_str()), (3, mine.id.as_str())]);
    }

    #[tokio::test]
    async fn entry_needs_a_resolvable_image() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, _, _) = contest(&remote);
        let repo = repo_with(remote.clone());
        let err = repo.submit_entry(&post, "Ada", "null").await.unwrap_err();
        assert!(matches!(err, RepoError::Validation(_)));
        assert_eq!(remote.calls(RemoteOp::CreateComment), 0);
    }

    #[tokio::test]
    async fn offline_comment_is_pending_then_confirmed_once() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let post = remote.insert_item(&draft("news", "hello"));
        let repo = repo_with(remote.clone());

        remote.set_offline(true);
        let pending = repo.create_comment(comment_draft(&post, "first!")).await.unwrap();
        assert!(pending.is_pending());
        let comments = repo.comments(&post).await;
        assert_eq!(comments, vec![pending.clone()]);

        remote.set_offline(false);
        repo.sync_pending().await;
        let comments = repo.comments(&post).await;
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0].origin, Origin::Remote);
        assert_eq!(comments[0].content, "first!");
        assert_eq!(remote.comment_count(&post), 1);
    }

    #[tokio::test]
    async fn landed_comment_is_not_sent_twice() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let post = remote.insert_item(&draft("news", "hello"));
        let repo = repo_with(remote.clone());

        remote.fail_next(RemoteOp::CreateComment, RemoteError::Transient("timeout".into()));
        let pending = repo.create_comment(comment_draft(&post, "hi")).await.unwrap();
        assert!(pending.is_pending());
        remote.insert_comment(&post, "u1", "Ada", "hi", None);

        let comments = repo.comments(&post).await;
        assert_eq!(comments.len(), 1);
        assert!(!comments[0].is_pending());
        assert!(repo.journal().is_empty());
        assert_eq!(repo.resolve_id(&pending.id), comments[0].id);
    }

    #[tokio::test]
    async fn comments_on_pending_post_stay_local() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        remote.set_offline(true);
        let post = repo.create(draft("news", "offline")).await.unwrap();
        remote.set_offline(false);

        let comment = repo.create_comment(comment_draft(&post.id, "me too")).await.unwrap();
        assert!(comment.is_pending());
        assert_eq!(remote.calls(RemoteOp::CreateComment), 0);
        assert_eq!(repo.comments(&post.id).await, vec![comment]);
        assert_eq!(remote.calls(RemoteOp::GetItemDetail), 0);
    }

    #[tokio::test]
    async fn offline_likes_cancel_out() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        let item = repo.create(draft("news", "likeable")).await.unwrap();
        let target = VoteTarget::Post(item.id.clone());

        remote.set_offline(true);
        let on = repo.toggle_like(&target, "u1").await;
        assert!(on.liked);
        assert_eq!(repo.pending_count(), 1);
        assert_eq!(repo.item(&item.id).unwrap().like_count, 1);

        let off = repo.toggle_like(&target, "u1").await;
        assert!(!off.liked);
        assert!(repo.journal().is_empty());
        assert_eq!(repo.item(&item.id).unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn like_is_idempotent() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        let item = repo.create(draft("news", "likeable")).await.unwrap();
        let target = VoteTarget::Post(item.id.clone());

        assert!(repo.like(&target, "u1").await.changed);
        assert!(!repo.like(&target, "u1").await.changed);
        assert_eq!(remote.calls(RemoteOp::LikeItem), 1);
        assert!(remote.liked_by(&target).contains("u1"));

        assert!(repo.unlike(&target, "u1").await.changed);
        assert!(remote.liked_by(&target).is_empty());
    }

    #[tokio::test]
    async fn liking_another_entry_moves_the_contest_vote() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;
        repo.cast_contest_vote(&post, &e1, "u1", VoteMode::WithdrawPreviousAndVote)
            .await
            .unwrap();

        let outcome = repo.like(&VoteTarget::Comment(e2.clone()), "u1").await;
        assert!(outcome.liked && outcome.changed);

        let held: Vec<String> = repo
            .votes()
            .entries(&post)
            .into_iter()
            .filter(|e| repo.votes().liked_by(&VoteTarget::Comment(e.clone())).contains("u1"))
            .collect();
        assert_eq!(held, vec![e2.clone()]);
        assert!(!remote.liked_by(&VoteTarget::Comment(e1.clone())).contains("u1"));
        assert!(remote.liked_by(&VoteTarget::Comment(e2.clone())).contains("u1"));

        let comments = repo.comments(&post).await;
        assert_eq!(comments.iter().filter(|c| c.liked_by.contains("u1")).count(), 1);
    }

    #[tokio::test]
    async fn entry_likes_follow_contest_rules() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let (post, e1, e2) = contest(&remote);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;

        assert!(repo.like(&VoteTarget::Comment(e1.clone()), "u1").await.changed);
        assert!(!repo.like(&VoteTarget::Comment(e1.clone()), "u1").await.changed);
        assert!(!repo.unlike(&VoteTarget::Comment(e2.clone()), "u1").await.changed);
        assert_eq!(remote.calls(RemoteOp::LikeComment), 1);
        assert_eq!(repo.votes().active_vote(&post, "u1"), Some(e1.clone()));

        let off = repo.toggle_like(&VoteTarget::Comment(e1.clone()), "u1").await;
        assert!(!off.liked && off.changed);
        assert!(repo.votes().active_vote(&post, "u1").is_none());
        assert!(remote.liked_by(&VoteTarget::Comment(e1)).is_empty());
    }

    #[tokio::test]
    async fn refetch_without_membership_keeps_votes() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let post = remote.insert_item(&draft("news", "chat"));
        let id = remote.insert_comment(&post, "u4", "Di", "nice!", None);
        let target = VoteTarget::Comment(id.clone());
        remote.set_likes(&target, &["u2"]);
        let repo = repo_with(remote.clone());
        repo.comments(&post).await;
        repo.like(&target, "u1").await;

        remote.omit_vote_membership(true);
        let comments = repo.comments(&post).await;
        let comment = comments.iter().find(|c| c.id == id).unwrap();
        assert_eq!(comment.like_count, 2);
        assert!(comment.liked_by.contains("u1"));
        assert!(comment.liked_by.contains("u2"));
    }

    #[tokio::test]
    async fn pending_vote_survives_refresh() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        remote.insert_item(&draft("news", "a"));
        let repo = repo_with(remote.clone());
        let id = repo.refresh(&["news"]).await[0].id.clone();

        remote.fail_next(RemoteOp::LikeItem, RemoteError::Transient("timeout".into()));
        repo.like(&VoteTarget::Post(id.clone()), "u1").await;
        assert_eq!(repo.pending_count(), 1);

        let view = repo.refresh(&["news"]).await;
        assert!(view[0].liked_by.contains("u1"));
    }
}
