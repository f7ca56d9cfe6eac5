use std::sync::Arc;

use async_trait::async_trait;

use cre_types::{EditPatch, PostDraft, VoteTarget};

use crate::error::RemoteResult;
use crate::payload::{CommentPayload, ItemDetailPayload, ItemPayload, RichCommentPayload};

/// The authoritative remote source.
///
/// Calls act on behalf of the session user. Timeouts belong to the
/// implementation and surface as [`RemoteError::Transient`](crate::RemoteError::Transient).
#[async_trait]
pub trait RemoteSource: Send + Sync {
    async fn list_items(&self, category: &str) -> RemoteResult<Vec<ItemPayload>>;

    /// The item with the identities and votes of its comments (Source B).
    async fn get_item_detail(&self, id: &str) -> RemoteResult<ItemDetailPayload>;

    /// The image-bearing comments of an item (Source A).
    async fn list_comments_rich(&self, id: &str) -> RemoteResult<Vec<RichCommentPayload>>;

    async fn create_item(&self, draft: &PostDraft) -> RemoteResult<ItemPayload>;
    async fn update_item(&self, id: &str, patch: &EditPatch) -> RemoteResult<ItemPayload>;
    async fn delete_item(&self, id: &str) -> RemoteResult<()>;

    async fn like_item(&self, id: &str) -> RemoteResult<()>;
    async fn unlike_item(&self, id: &str) -> RemoteResult<()>;

    /// `attachment` is a canonical image URL.
    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        attachment: Option<&str>,
    ) -> RemoteResult<CommentPayload>;

    async fn like_comment(&self, id: &str) -> RemoteResult<()>;
    async fn unlike_comment(&self, id: &str) -> RemoteResult<()>;

    /// Dispatch to the like endpoint of the target's kind.
    async fn set_vote(&self, target: &VoteTarget, liked: bool) -> RemoteResult<()> {
        match (target, liked) {
            (VoteTarget::Post(id), true) => self.like_item(id).await,
            (VoteTarget::Post(id), false) => self.unlike_item(id).await,
            (VoteTarget::Comment(id), true) => self.like_comment(id).await,
            (VoteTarget::Comment(id), false) => self.unlike_comment(id).await,
        }
    }
}

#[async_trait]
impl<T: RemoteSource + ?Sized> RemoteSource for Arc<T> {
    async fn list_items(&self, category: &str) -> RemoteResult<Vec<ItemPayload>> {
        (**self).list_items(category).await
    }

    async fn get_item_detail(&self, id: &str) -> RemoteResult<ItemDetailPayload> {
        (**self).get_item_detail(id).await
    }

    async fn list_comments_rich(&self, id: &str) -> RemoteResult<Vec<RichCommentPayload>> {
        (**self).list_comments_rich(id).await
    }

    async fn create_item(&self, draft: &PostDraft) -> RemoteResult<ItemPayload> {
        (**self).create_item(draft).await
    }

    async fn update_item(&self, id: &str, patch: &EditPatch) -> RemoteResult<ItemPayload> {
        (**self).update_item(id, patch).await
    }

    async fn delete_item(&self, id: &str) -> RemoteResult<()> {
        (**self).delete_item(id).await
    }

    async fn like_item(&self, id: &str) -> RemoteResult<()> {
        (**self).like_item(id).await
    }

    async fn unlike_item(&self, id: &str) -> RemoteResult<()> {
        (**self).unlike_item(id).await
    }

    async fn create_comment(
        &self,
        post_id: &str,
        content: &str,
        attachment: Option<&str>,
    ) -> RemoteResult<CommentPayload> {
        (**self).create_comment(post_id, content, attachment).await
    }

    async fn like_comment(&self, id: &str) -> RemoteResult<()> {
        (**self).like_comment(id).await
    }

    async fn unlike_comment(&self, id: &str) -> RemoteResult<()> {
        (**self).unlike_comment(id).await
    }
}
