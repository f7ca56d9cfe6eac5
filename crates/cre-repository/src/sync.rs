//! Journal replay.

use serde::Serialize;
use tracing::{debug, info, warn};

use cre_journal::JournalBackend;
use cre_remote::{RemoteError, RemoteResult, RemoteSource};
use cre_types::{ContentItem, ItemId, PendingWrite, VoteTarget, WriteKind, WritePayload};

use crate::repository::PostRepository;

/// What one [`sync_pending`](PostRepository::sync_pending) pass did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Writes delivered, or found to be moot because the target is gone.
    pub confirmed: usize,
    /// Writes the remote source refused; they are not retried.
    pub dropped: usize,
    /// Replay stopped at an undeliverable write. It and every later write
    /// stay journaled.
    pub stopped: bool,
    /// Posts created by the replay.
    pub created: Vec<ContentItem>,
    /// Posts edited by the replay.
    pub updated: Vec<ContentItem>,
    /// Posts deleted by the replay.
    pub deleted: Vec<ItemId>,
    /// Votes of the session user delivered by the replay.
    pub voted: Vec<(VoteTarget, bool)>,
}

impl<R: RemoteSource, B: JournalBackend> PostRepository<R, B> {
    /// Replay journaled writes in order.
    ///
    /// A delivered write is confirmed. A write whose target no longer exists
    /// is confirmed too, and a rejected one is dropped. A transient failure
    /// stops the replay so later writes never overtake earlier ones. Only one
    /// replay runs at a time.
    pub async fn sync_pending(&self) -> SyncReport {
        let _guard = self.sync_lock.lock().await;
        let mut report = SyncReport::default();

        for queued in self.journal.list_pending(None) {
            // Earlier steps may have retargeted or discarded it.
            let Some(write) = self.journal.get(&queued.local_id) else {
                continue;
            };
            match self.replay(&write, &mut report).await {
                Ok(()) => {
                    self.journal.confirm(&write.local_id);
                    report.confirmed += 1;
                }
                Err(RemoteError::NotFound(reason)) => {
                    debug!(local_id = %write.local_id, kind = %write.kind, %reason, "target gone; confirming");
                    self.journal.confirm(&write.local_id);
                    report.confirmed += 1;
                }
                Err(RemoteError::Rejected(reason)) => {
                    warn!(
                        local_id = %write.local_id,
                        kind = %write.kind,
                        target = %write.target_id,
                        %reason,
                        "sync discrepancy: pending write rejected; dropping"
                    );
                    self.journal.confirm(&write.local_id);
                    report.dropped += 1;
                }
                Err(RemoteError::Transient(reason)) => {
                    debug!(local_id = %write.local_id, kind = %write.kind, %reason, "replay stopped");
                    report.stopped = true;
                    break;
                }
            }
        }

        if report.confirmed + report.dropped > 0 || report.stopped {
            info!(
                confirmed = report.confirmed,
                dropped = report.dropped,
                stopped = report.stopped,
                remaining = self.journal.len(),
                "journal replayed"
            );
        }
        report
    }

    async fn replay(&self, write: &PendingWrite, report: &mut SyncReport) -> RemoteResult<()> {
        let target_id = self.resolve_id(&write.target_id);
        match (&write.kind, &write.payload) {
            (WriteKind::CreatePost, WritePayload::Post(draft)) => {
                let item = self.normalizer.item(self.remote.create_item(draft).await?);
                if item.id.is_empty() {
                    // A later refresh confirms it by content if it landed.
                    return Err(RemoteError::Transient("created item came back without id".into()));
                }
                let local_id = write.local_id.to_string();
                self.journal.confirm(&write.local_id);
                {
                    let mut view = self.write_view();
                    if let Some(slot) = view.items.iter_mut().find(|i| i.id == local_id) {
                        *slot = item.clone();
                    }
                }
                self.adopt_confirmed(&local_id, &item.id);
                info!(%local_id, id = %item.id, "pending post delivered");
                report.created.push(item);
                Ok(())
            }
            (WriteKind::CreateComment, WritePayload::Comment(draft)) => {
                if self.is_pending_local(&target_id) {
                    return Err(RemoteError::Transient(format!("post {target_id} is not delivered yet")));
                }
                let mut draft = draft.clone();
                draft.post_id = target_id;
                let payload = self
                    .remote
                    .create_comment(&draft.post_id, &draft.content, draft.image.as_deref())
                    .await?;
                let comment = self.landed_comment(&draft, self.normalizer.comment(&draft.post_id, payload));
                let local_id = write.local_id.to_string();
                self.journal.confirm(&write.local_id);
                self.adopt_confirmed(&local_id, &comment.id);
                self.record_comment(&comment);
                info!(%local_id, id = %comment.id, post_id = %comment.post_id, "pending comment delivered");
                Ok(())
            }
            (WriteKind::Like | WriteKind::Unlike, WritePayload::Vote(target)) => {
                let target = target.with_id(target_id);
                if self.is_pending_local(target.id()) {
                    return Err(RemoteError::Transient(format!("{target} is not delivered yet")));
                }
                let liked = write.kind == WriteKind::Like;
                self.remote.set_vote(&target, liked).await?;
                report.voted.push((target, liked));
                Ok(())
            }
            (WriteKind::Edit, WritePayload::Edit(patch)) => {
                let mut item = self.normalizer.item(self.remote.update_item(&target_id, patch).await?);
                if !item.id.is_empty() {
                    if let Some(liked_by) = self.votes.membership(&VoteTarget::Post(item.id.clone())) {
                        item.set_liked_by(liked_by);
                    }
                    self.update_view_item(&item.id, |slot| *slot = item.clone());
                    report.updated.push(item);
                }
                Ok(())
            }
            (WriteKind::Delete, _) => {
                match self.remote.delete_item(&target_id).await {
                    Ok(()) | Err(RemoteError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                report.deleted.push(target_id);
                Ok(())
            }
            (kind, _) => Err(RemoteError::Rejected(format!("{kind} write with a mismatched payload"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cre_remote::{InMemoryRemote, RemoteOp};
    use cre_types::{CommentDraft, EditPatch};

    use super::*;
    use crate::testing::{draft, repo_with};

    #[tokio::test]
    async fn empty_journal_is_a_no_op() {
        let repo = repo_with(Arc::new(InMemoryRemote::new("u1", "Ada")));
        assert_eq!(repo.sync_pending().await, SyncReport::default());
    }

    #[tokio::test]
    async fn replay_keeps_order_and_stops_on_transient() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        remote.set_offline(true);
        let post = repo.create(draft("news", "offline")).await.unwrap();
        repo.create_comment(CommentDraft {
            post_id: post.id.clone(),
            author_id: "u1".into(),
            author: "Ada".into(),
            content: "first".into(),
            image: None,
        })
        .await
        .unwrap();
        assert_eq!(repo.pending_count(), 2);

        remote.set_offline(false);
        remote.fail_next(RemoteOp::CreateComment, RemoteError::Transient("timeout".into()));
        let report = repo.sync_pending().await;
        assert_eq!(report.confirmed, 1);
        assert!(report.stopped);
        assert_eq!(report.created.len(), 1);

        let server_id = report.created[0].id.clone();
        let left = repo.journal().list_pending(None);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].target_id, server_id);

        let report = repo.sync_pending().await;
        assert_eq!(report.confirmed, 1);
        assert!(!report.stopped);
        assert_eq!(remote.comment_count(&server_id), 1);
        assert_eq!(repo.item(&post.id).unwrap().id, server_id);
    }

    #[tokio::test]
    async fn rejected_write_is_dropped() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        let item = repo.create(draft("news", "a")).await.unwrap();
        remote.set_offline(true);
        repo.like(&VoteTarget::Post(item.id.clone()), "u1").await;
        remote.set_offline(false);

        remote.fail_next(RemoteOp::LikeItem, RemoteError::Rejected("own post".into()));
        let report = repo.sync_pending().await;
        assert_eq!(report.dropped, 1);
        assert!(repo.journal().is_empty());
    }

    #[tokio::test]
    async fn write_against_vanished_target_is_confirmed() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        let item = repo.create(draft("news", "a")).await.unwrap();
        remote.set_offline(true);
        let patch = EditPatch {
            title: Some("b".into()),
            ..Default::default()
        };
        repo.edit(&item.id, patch).await.unwrap();
        remote.set_offline(false);
        remote.delete_item(&item.id).await.unwrap();

        let report = repo.sync_pending().await;
        assert_eq!(report.confirmed, 1);
        assert_eq!(report.dropped, 0);
        assert!(repo.journal().is_empty());
    }

    #[tokio::test]
    async fn vote_on_pending_post_follows_it() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = repo_with(remote.clone());
        remote.set_offline(true);
        let post = repo.create(draft("news", "offline")).await.unwrap();
        remote.set_offline(false);

        let outcome = repo.like(&VoteTarget::Post(post.id.clone()), "u1").await;
        assert!(outcome.liked);
        assert_eq!(remote.calls(RemoteOp::LikeItem), 0);

        let report = repo.sync_pending().await;
        assert_eq!(report.confirmed, 2);
        let server_id = repo.resolve_id(&post.id);
        assert!(remote.liked_by(&VoteTarget::Post(server_id.clone())).contains("u1"));
        assert!(repo.votes().liked_by(&VoteTarget::Post(server_id)).contains("u1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_replays_deliver_once() {
        let remote = Arc::new(InMemoryRemote::new("u1", "Ada"));
        let repo = Arc::new(repo_with(remote.clone()));
        remote.set_offline(true);
        repo.create(draft("news", "once")).await.unwrap();
        remote.set_offline(false);
        remote.set_default_latency(Duration::from_millis(20));

        let a = tokio::spawn({
            let repo = repo.clone();
            async move { repo.sync_pending().await }
        });
        let b = tokio::spawn({
            let repo = repo.clone();
            async move { repo.sync_pending().await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a.confirmed + b.confirmed, 1);
        assert_eq!(remote.item_count(), 1);
    }
}
