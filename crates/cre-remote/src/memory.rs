use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::debug;

use cre_types::{EditPatch, ItemId, PostDraft, UserId, VoteTarget};

use crate::error::{RemoteError, RemoteResult};
use crate::payload::{CommentPayload, ItemDetailPayload, ItemPayload, RichCommentPayload};
use crate::transport::RemoteSource;

/// Remote operations, for fault injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListItems,
    GetItemDetail,
    ListCommentsRich,
    CreateItem,
    UpdateItem,
    DeleteItem,
    LikeItem,
    UnlikeItem,
    CreateComment,
    LikeComment,
    UnlikeComment,
}

#[derive(Clone, Debug)]
struct StoredItem {
    id: ItemId,
    author_id: UserId,
    author: String,
    category: String,
    title: String,
    content: String,
    images: Vec<String>,
    liked_by: BTreeSet<UserId>,
    created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct StoredComment {
    id: ItemId,
    post_id: ItemId,
    author_id: UserId,
    author: String,
    content: String,
    image: Option<String>,
    liked_by: BTreeSet<UserId>,
    created_at: DateTime<Utc>,
}

struct RemoteState {
    next_id: u64,
    clock: DateTime<Utc>,
    items: Vec<StoredItem>,
    comments: Vec<StoredComment>,
    offline: bool,
    omit_vote_membership: bool,
    faults: HashMap<RemoteOp, VecDeque<RemoteError>>,
    latency: HashMap<String, Duration>,
    default_latency: Duration,
    calls: HashMap<RemoteOp, usize>,
}

impl RemoteState {
    fn next_id(&mut self) -> ItemId {
        self.next_id += 1;
        self.next_id.to_string()
    }

    /// Each record is one second younger than the previous one.
    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += chrono::Duration::seconds(1);
        self.clock
    }

    fn item_mut(&mut self, id: &str) -> RemoteResult<&mut StoredItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("item {id}")))
    }

    fn comment_mut(&mut self, id: &str) -> RemoteResult<&mut StoredComment> {
        self.comments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("comment {id}")))
    }

    fn item_payload(&self, item: &StoredItem) -> ItemPayload {
        ItemPayload {
            id: item.id.clone(),
            author_id: item.author_id.clone(),
            author: item.author.clone(),
            category: item.category.clone(),
            title: item.title.clone(),
            content: item.content.clone(),
            images: item.images.iter().cloned().map(Value::String).collect(),
            like_count: Some(item.liked_by.len() as u64),
            liked_by: self.membership(&item.liked_by),
            comment_count: Some(self.comments.iter().filter(|c| c.post_id == item.id).count() as u64),
            created_at: item.created_at.to_rfc3339(),
        }
    }

    fn comment_payload(&self, comment: &StoredComment) -> CommentPayload {
        CommentPayload {
            id: comment.id.clone(),
            post_id: comment.post_id.clone(),
            author_id: comment.author_id.clone(),
            author: comment.author.clone(),
            content: comment.content.clone(),
            like_count: Some(comment.liked_by.len() as u64),
            liked_by: self.membership(&comment.liked_by),
            created_at: comment.created_at.to_rfc3339(),
        }
    }

    fn membership(&self, liked_by: &BTreeSet<UserId>) -> Vec<Value> {
        if self.omit_vote_membership {
            return Vec::new();
        }
        liked_by.iter().cloned().map(Value::String).collect()
    }
}

/// A remote source held entirely in memory, for tests and demos.
///
/// Acts on behalf of a single viewer. Supports going offline, queued
/// per-operation faults, artificial latency per category, and call
/// counting.
pub struct InMemoryRemote {
    viewer_id: UserId,
    viewer_name: String,
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new(viewer_id: impl Into<UserId>, viewer_name: impl Into<String>) -> Self {
        Self {
            viewer_id: viewer_id.into(),
            viewer_name: viewer_name.into(),
            state: Mutex::new(RemoteState {
                next_id: 0,
                clock: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().unwrap_or_default(),
                items: Vec::new(),
                comments: Vec::new(),
                offline: false,
                omit_vote_membership: false,
                faults: HashMap::new(),
                latency: HashMap::new(),
                default_latency: Duration::ZERO,
                calls: HashMap::new(),
            }),
        }
    }

    pub fn viewer_id(&self) -> &str {
        &self.viewer_id
    }

    /// While offline every call fails with a transient error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Queue a failure for the next call of `op`.
    pub fn fail_next(&self, op: RemoteOp, error: RemoteError) {
        self.lock().faults.entry(op).or_default().push_back(error);
    }

    /// Delay `list_items` for one category.
    pub fn set_latency(&self, category: &str, latency: Duration) {
        self.lock().latency.insert(category.to_string(), latency);
    }

    /// Delay every call without a category-specific latency.
    pub fn set_default_latency(&self, latency: Duration) {
        self.lock().default_latency = latency;
    }

    /// Report counts but not who voted, like a listing endpoint that omits
    /// membership.
    pub fn omit_vote_membership(&self, omit: bool) {
        self.lock().omit_vote_membership = omit;
    }

    pub fn calls(&self, op: RemoteOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Seed an item without counting a call.
    pub fn insert_item(&self, draft: &PostDraft) -> ItemId {
        let mut state = self.lock();
        let id = state.next_id();
        let created_at = state.tick();
        state.items.push(StoredItem {
            id: id.clone(),
            author_id: draft.author_id.clone(),
            author: draft.author.clone(),
            category: draft.category.clone(),
            title: draft.title.clone(),
            content: draft.content.clone(),
            images: draft.images.clone(),
            liked_by: BTreeSet::new(),
            created_at,
        });
        id
    }

    /// Seed a comment without counting a call.
    pub fn insert_comment(
        &self,
        post_id: &str,
        author_id: &str,
        author: &str,
        content: &str,
        image: Option<&str>,
    ) -> ItemId {
        let mut state = self.lock();
        let id = state.next_id();
        let created_at = state.tick();
        state.comments.push(StoredComment {
            id: id.clone(),
            post_id: post_id.to_string(),
            author_id: author_id.to_string(),
            author: author.to_string(),
            content: content.to_string(),
            image: image.map(str::to_string),
            liked_by: BTreeSet::new(),
            created_at,
        });
        id
    }

    /// Replace who voted for a target. Unknown targets are ignored.
    pub fn set_likes(&self, target: &VoteTarget, users: &[&str]) {
        let users: BTreeSet<UserId> = users.iter().map(|u| u.to_string()).collect();
        let mut state = self.lock();
        match target {
            VoteTarget::Post(id) => {
                if let Ok(item) = state.item_mut(id) {
                    item.liked_by = users;
                }
            }
            VoteTarget::Comment(id) => {
                if let Ok(comment) = state.comment_mut(id) {
                    comment.liked_by = users;
                }
            }
        }
    }

    pub fn liked_by(&self, target: &VoteTarget) -> BTreeSet<UserId> {
        let mut state = self.lock();
        let liked_by = match target {
            VoteTarget::Post(id) => state.item_mut(id).map(|i| i.liked_by.clone()),
            VoteTarget::Comment(id) => state.comment_mut(id).map(|c| c.liked_by.clone()),
        };
        liked_by.unwrap_or_default()
    }

    pub fn item(&self, id: &str) -> Option<ItemPayload> {
        let state = self.lock();
        state
            .items
            .iter()
            .find(|i| i.id == id)
            .map(|i| state.item_payload(i))
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }

    pub fn comment_count(&self, post_id: &str) -> usize {
        self.lock().comments.iter().filter(|c| c.post_id == post_id).count()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().expect("lock poisoned")
    }

    /// Count the call, wait out the latency, then apply any fault.
    async fn enter(&self, op: RemoteOp, category: Option<&str>) -> RemoteResult<()> {
        let (delay, fault) = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let delay = category
                .and_then(|c| state.latency.get(c).copied())
                .unwrap_or(state.default_latency);
            let fault = if state.offline {
                Some(RemoteError::Transient("remote unreachable".into()))
            } else {
                state.faults.get_mut(&op).and_then(VecDeque::pop_front)
            };
            (delay, fault)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match fault {
            Some(e) => {
                debug!(?op, error = %e, "injected remote failure");
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn set_item_vote(&self, id: &str, liked: bool) -> RemoteResult<()> {
        let mut state = self.lock();
        let item = state.item_mut(id)?;
        if liked {
            item.liked_by.insert(self.viewer_id.clone());
        } else {
            item.liked_by.remove(&self.viewer_id);
        }
        Ok(())
    }

    fn set_comment_vote(&self, id: &str, liked: bool) -> RemoteResult<()> {
        let mut state = self.lock();
        let comment = state.comment_mut(id)?;
        if liked {
            comment.liked_by.insert(self.viewer_id.clone());
        } else {
            comment.liked_by.remove(&self.viewer_id);
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("InMemoryRemote")
            .field("viewer_id", &self.viewer_id)
            .field("items", &state.items.len())
            .field("comments", &state.comments.len())
            .field("offline", &state.offline)
            .finish()
    }
}

#[async_trait]
impl RemoteSource for InMemoryRemote {
    async fn list_items(&self, category: &str) -> RemoteResult<Vec<ItemPayload>> {
        self.enter(RemoteOp::ListItems, Some(category)).await?;
        let state = self.lock();
        Ok(state
            .items
            .iter()
            .filter(|i| i.category == category)
            .map(|i| state.item_payload(i))
            .collect())
    }

    async fn get_item_detail(&self, id: &str) -> RemoteResult<ItemDetailPayload> {
        self.enter(RemoteOp::GetItemDetail, None).await?;
        let state = self.lock();
        let item = state
            .items
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| RemoteError::NotFound(format!("item {id}")))?;
        Ok(ItemDetailPayload {
            item: state.item_payload(item),
            comments: state
                .comments
                .iter()
                .filter(|c| c.post_id == id)
                .map(|c| state.comment_payload(c))
                .collect(),
        })
    }

    async fn list_comments_rich(&self, id: &str) -> RemoteResult<Vec<RichCommentPayload>> {
        self.enter(RemoteOp::ListCommentsRich, None).await?;
        let state = self.lock();
        if !state.items.iter().any(|i| i.id == id) {
            return Err(RemoteError::NotFound(format!("item {id}")));
        }
        Ok(state
            .comments
            .iter()
            .filter(|c| c.post_id == id)
            .map(|c| RichCommentPayload {
                author: c.author.clone(),
                author_id: c.author_id.clone(),
                content: c.content.clone(),
                image: c.image.clone().map(Value::String).unwrap_or(Value::Null),
                created_at: c.created_at.to_rfc3339(),
            })
            .collect())
    }

    async fn create_item(&self, draft: &PostDraft) -> RemoteResult<ItemPayload> {
        self.enter(RemoteOp::CreateItem, None).await?;
        let id = self.insert_item(draft);
        self.item(&id)
            .ok_or_else(|| RemoteError::Transient(format!("item {id} vanished")))
    }

    async fn update_item(&self, id: &str, patch: &EditPatch) -> RemoteResult<ItemPayload> {
        self.enter(RemoteOp::UpdateItem, None).await?;
        let mut state = self.lock();
        let item = state.item_mut(id)?;
        if let Some(title) = &patch.title {
            item.title = title.clone();
        }
        if let Some(content) = &patch.content {
            item.content = content.clone();
        }
        if let Some(images) = &patch.images {
            item.images = images.clone();
        }
        let item = item.clone();
        Ok(state.item_payload(&item))
    }

    async fn delete_item(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::DeleteItem, None).await?;
        let mut state = self.lock();
        let before = state.items.len();
        state.items.retain(|i| i.id != id);
        if state.items.len() == before {
            return Err(RemoteError::NotFound(format!("item {id}")));
        }
        state.comments.retain(|c| c.post_id != id);
        Ok(())
    }

    async fn like_item(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::LikeItem, None).await?;
        self.set_item_vote(id, true)
    }

    async fn unlike_item(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::UnlikeItem, None).await?;
        self.set_item_vote(id, false)
    }

    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        attachment: Option<&str>,
    ) -> RemoteResult<CommentPayload> {
        self.enter(RemoteOp::CreateComment, None).await?;
        if !self.lock().items.iter().any(|i| i.id == post_id) {
            return Err(RemoteError::NotFound(format!("item {post_id}")));
        }
        let id = self.insert_comment(post_id, &self.viewer_id, &self.viewer_name, content, attachment);
        let mut state = self.lock();
        let comment = state.comment_mut(&id)?.clone();
        Ok(state.comment_payload(&comment))
    }

    async fn like_comment(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::LikeComment, None).await?;
        self.set_comment_vote(id, true)
    }

    async fn unlike_comment(&self, id: &str) -> RemoteResult<()> {
        self.enter(RemoteOp::UnlikeComment, None).await?;
        self.set_comment_vote(id, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(category: &str, title: &str) -> PostDraft {
        PostDraft {
            author_id: "u1".into(),
            author: "Ada".into(),
            category: category.into(),
            title: title.into(),
            content: "body".into(),
            images: vec![],
        }
    }

    #[tokio::test]
    async fn create_then_list_by_category() {
        let remote = InMemoryRemote::new("u1", "Ada");
        remote.create_item(&draft("news", "a")).await.unwrap();
        remote.create_item(&draft("contest", "b")).await.unwrap();

        let news = remote.list_items("news").await.unwrap();
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].title, "a");
        assert_eq!(remote.calls(RemoteOp::CreateItem), 2);
        assert_eq!(remote.calls(RemoteOp::ListItems), 1);
    }

    #[tokio::test]
    async fn offline_and_queued_faults() {
        let remote = InMemoryRemote::new("u1", "Ada");
        remote.set_offline(true);
        let err = remote.list_items("news").await.unwrap_err();
        assert!(err.is_transient());

        remote.set_offline(false);
        remote.fail_next(RemoteOp::ListItems, RemoteError::Rejected("nope".into()));
        assert_eq!(
            remote.list_items("news").await.unwrap_err(),
            RemoteError::Rejected("nope".into())
        );
        assert!(remote.list_items("news").await.is_ok());
    }

    #[tokio::test]
    async fn votes_act_as_viewer() {
        let remote = InMemoryRemote::new("u1", "Ada");
        let id = remote.insert_item(&draft("news", "a"));
        let target = VoteTarget::Post(id.clone());

        remote.set_vote(&target, true).await.unwrap();
        assert!(remote.liked_by(&target).contains("u1"));
        remote.set_vote(&target, false).await.unwrap();
        assert!(remote.liked_by(&target).is_empty());

        let missing = VoteTarget::Comment("404".into());
        assert!(remote.set_vote(&missing, true).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn detail_and_rich_sources_describe_the_same_comments() {
        let remote = InMemoryRemote::new("u1", "Ada");
        let post = remote.insert_item(&draft("contest", "c"));
        remote.insert_comment(&post, "u2", "Bob", "[contest-entry]", Some("uploads/e.png"));
        remote.create_comment(&post, "nice", None).await.unwrap();

        let detail = remote.get_item_detail(&post).await.unwrap();
        assert_eq!(detail.comments.len(), 2);
        assert_eq!(detail.item.comment_count, Some(2));

        let rich = remote.list_comments_rich(&post).await.unwrap();
        assert_eq!(rich[0].image, Value::String("uploads/e.png".into()));
        assert_eq!(rich[1].author, "Ada");
        assert_eq!(rich[1].image, Value::Null);
    }

    #[tokio::test]
    async fn omitted_membership_still_reports_counts() {
        let remote = InMemoryRemote::new("u1", "Ada");
        let id = remote.insert_item(&draft("news", "a"));
        remote.set_likes(&VoteTarget::Post(id), &["u2", "u3"]);
        remote.omit_vote_membership(true);

        let items = remote.list_items("news").await.unwrap();
        assert_eq!(items[0].like_count, Some(2));
        assert!(items[0].liked_by.is_empty());
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let remote = InMemoryRemote::new("u1", "Ada");
        let id = remote.insert_item(&draft("news", "a"));
        remote.delete_item(&id).await.unwrap();
        assert!(remote.delete_item(&id).await.unwrap_err().is_not_found());
        assert_eq!(remote.item_count(), 0);
    }

    #[tokio::test]
    async fn latency_is_per_category() {
        let remote = InMemoryRemote::new("u1", "Ada");
        remote.set_latency("slow", Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        remote.list_items("slow").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
