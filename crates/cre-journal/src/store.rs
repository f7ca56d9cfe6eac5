use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info, warn};

use cre_image::ImageResolver;
use cre_types::{Comment, ContentItem, LocalId, Origin, PendingWrite, WriteKind, WritePayload};

use crate::backend::JournalBackend;
use crate::config::JournalConfig;
use crate::error::JournalResult;
use crate::record::JournalRecord;

/// A pending write projected into the shape of a remote entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Materialized {
    Item(ContentItem),
    Comment(Comment),
}

#[derive(Default)]
struct StoreState {
    pending: Vec<PendingWrite>,
    /// The durable copy is behind the in-memory one; the next persist must
    /// rewrite everything.
    dirty: bool,
    /// A background retry task is running.
    retrying: bool,
}

/// Journal of writes not yet confirmed by the remote source.
///
/// Every mutation updates the in-memory journal first and then persists
/// synchronously. A failed durable write is logged and retried in the
/// background; callers never see it.
pub struct LocalFallbackStore<B: JournalBackend> {
    namespace: String,
    backend: Arc<B>,
    state: Arc<Mutex<StoreState>>,
    resolver: ImageResolver,
    config: JournalConfig,
}

impl<B: JournalBackend> LocalFallbackStore<B> {
    /// Load the journal from `backend`, replay it, and compact away
    /// confirmed entries.
    pub fn open(
        namespace: impl Into<String>,
        backend: B,
        config: JournalConfig,
        resolver: ImageResolver,
    ) -> JournalResult<Self> {
        let namespace = namespace.into();
        let records = backend.load()?;
        let record_count = records.len();
        let pending = JournalRecord::replay(records);

        let store = Self {
            namespace,
            backend: Arc::new(backend),
            state: Arc::new(Mutex::new(StoreState {
                pending,
                ..Default::default()
            })),
            resolver,
            config,
        };

        let mut state = store.lock();
        if record_count != state.pending.len() {
            if let Err(e) = store.backend.rewrite(&state.pending) {
                warn!(namespace = %store.namespace, error = %e, "journal compaction failed");
                state.dirty = true;
            }
        }
        info!(namespace = %store.namespace, pending = state.pending.len(), "journal opened");
        drop(state);
        Ok(store)
    }

    /// Journal a write. Never fails from the caller's point of view.
    pub fn append(&self, write: PendingWrite) {
        let mut state = self.lock();
        debug!(local_id = %write.local_id, kind = %write.kind, target = %write.target_id, "journal append");
        let record = JournalRecord::Append(write.clone());
        state.pending.push(write);
        self.persist(&mut state, &record);
    }

    /// Pending writes in append order, optionally only those touching
    /// `target_id`.
    pub fn list_pending(&self, target_id: Option<&str>) -> Vec<PendingWrite> {
        let state = self.lock();
        match target_id {
            Some(id) => state.pending.iter().filter(|w| w.touches(id)).cloned().collect(),
            None => state.pending.clone(),
        }
    }

    pub fn get(&self, local_id: &LocalId) -> Option<PendingWrite> {
        self.lock().pending.iter().find(|w| &w.local_id == local_id).cloned()
    }

    /// Remove a confirmed write. Returns `false` if it was not pending.
    pub fn confirm(&self, local_id: &LocalId) -> bool {
        let mut state = self.lock();
        let before = state.pending.len();
        state.pending.retain(|w| &w.local_id != local_id);
        if state.pending.len() == before {
            return false;
        }
        debug!(local_id = %local_id, "journal confirm");
        self.persist(&mut state, &JournalRecord::Confirm(local_id.clone()));
        true
    }

    /// Replace the payload of a pending write in place (keeps its position
    /// and local id). Returns `false` if it was not pending.
    pub fn replace(&self, write: PendingWrite) -> bool {
        let mut state = self.lock();
        let Some(slot) = state.pending.iter_mut().find(|w| w.local_id == write.local_id) else {
            return false;
        };
        *slot = write;
        state.dirty = true;
        self.persist_full(&mut state);
        true
    }

    /// Drop every write touching `id` (used when a pending-local entity is
    /// deleted before it ever reached the remote source).
    pub fn discard_for(&self, id: &str) -> Vec<PendingWrite> {
        let mut state = self.lock();
        let (discarded, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut state.pending).into_iter().partition(|w| w.touches(id));
        state.pending = kept;
        if !discarded.is_empty() {
            debug!(target = id, count = discarded.len(), "journal discard");
            state.dirty = true;
            self.persist_full(&mut state);
        }
        discarded
    }

    /// Project pending creates into entities tagged `PendingLocal`.
    pub fn materialize(&self) -> Vec<Materialized> {
        let state = self.lock();
        state
            .pending
            .iter()
            .filter_map(|write| match (&write.kind, &write.payload) {
                (WriteKind::CreatePost, WritePayload::Post(draft)) => {
                    let id = write.local_id.to_string();
                    let comment_count = state
                        .pending
                        .iter()
                        .filter(|w| w.kind == WriteKind::CreateComment && w.target_id == id)
                        .count() as u64;
                    Some(Materialized::Item(ContentItem {
                        id,
                        origin: Origin::PendingLocal,
                        author_id: draft.author_id.clone(),
                        author: draft.author.clone(),
                        category: draft.category.clone(),
                        title: draft.title.clone(),
                        content: draft.content.clone(),
                        images: self.resolver.resolve_strs(&draft.images),
                        like_count: 0,
                        liked_by: Default::default(),
                        comment_count,
                        created_at: write.created_at,
                    }))
                }
                (WriteKind::CreateComment, WritePayload::Comment(draft)) => {
                    Some(Materialized::Comment(Comment {
                        id: write.local_id.to_string(),
                        post_id: draft.post_id.clone(),
                        origin: Origin::PendingLocal,
                        author_id: draft.author_id.clone(),
                        author: draft.author.clone(),
                        content: draft.content.clone(),
                        image_ref: draft.image.as_deref().and_then(|raw| self.resolver.resolve_str(raw)),
                        like_count: 0,
                        liked_by: Default::default(),
                        created_at: write.created_at,
                    }))
                }
                _ => None,
            })
            .collect()
    }

    /// Rewrite the durable journal from memory now.
    pub fn flush(&self) -> JournalResult<()> {
        let mut state = self.lock();
        self.backend.rewrite(&state.pending)?;
        state.dirty = false;
        Ok(())
    }

    /// `false` while the durable journal lags behind memory.
    pub fn is_durable(&self) -> bool {
        !self.lock().dirty
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().expect("journal state poisoned")
    }

    fn persist(&self, state: &mut StoreState, record: &JournalRecord) {
        if state.dirty {
            return self.persist_full(state);
        }
        if let Err(e) = self.backend.append(record) {
            warn!(namespace = %self.namespace, error = %e, "durable journal write failed; retry scheduled");
            state.dirty = true;
            self.schedule_retry(state);
        }
    }

    fn persist_full(&self, state: &mut StoreState) {
        match self.backend.rewrite(&state.pending) {
            Ok(()) => state.dirty = false,
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "durable journal rewrite failed; retry scheduled");
                state.dirty = true;
                self.schedule_retry(state);
            }
        }
    }

    fn schedule_retry(&self, state: &mut StoreState) {
        if state.retrying {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(namespace = %self.namespace, "no async runtime; durable write retried on next mutation");
            return;
        };
        state.retrying = true;
        handle.spawn(retry_durable_write(
            self.namespace.clone(),
            Arc::clone(&self.backend),
            Arc::clone(&self.state),
            self.config.clone(),
        ));
    }
}

async fn retry_durable_write<B: JournalBackend>(
    namespace: String,
    backend: Arc<B>,
    state: Arc<Mutex<StoreState>>,
    config: JournalConfig,
) {
    for attempt in 0..config.max_retries {
        let delay = config.retry_delay(attempt);
        let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64 / 4);
        tokio::time::sleep(delay + Duration::from_millis(jitter_ms)).await;

        let mut st = state.lock().expect("journal state poisoned");
        if !st.dirty {
            st.retrying = false;
            return;
        }
        match backend.rewrite(&st.pending) {
            Ok(()) => {
                st.dirty = false;
                st.retrying = false;
                info!(namespace = %namespace, attempt, "durable journal restored");
                return;
            }
            Err(e) => warn!(namespace = %namespace, attempt, error = %e, "durable journal retry failed"),
        }
    }
    state.lock().expect("journal state poisoned").retrying = false;
    warn!(namespace = %namespace, "giving up durable journal retries until next mutation");
}

impl<B: JournalBackend> std::fmt::Debug for LocalFallbackStore<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalFallbackStore")
            .field("namespace", &self.namespace)
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileJournal;
    use crate::memory::MemoryJournal;
    use crate::SyncMode;
    use cre_image::ResolverConfig;
    use cre_types::{CommentDraft, EditPatch, PostDraft, VoteTarget};

    fn resolver() -> ImageResolver {
        ImageResolver::new(&ResolverConfig::with_base_url("https://host"))
    }

    fn fast_config() -> JournalConfig {
        JournalConfig {
            retry_initial_ms: 1,
            retry_max_ms: 5,
            ..Default::default()
        }
    }

    fn memory_store() -> LocalFallbackStore<MemoryJournal> {
        LocalFallbackStore::open("u1", MemoryJournal::new(), fast_config(), resolver()).unwrap()
    }

    fn post_draft(title: &str) -> PostDraft {
        PostDraft {
            author_id: "u1".into(),
            author: "Ada".into(),
            category: "community".into(),
            title: title.into(),
            content: "body".into(),
            images: vec!["uploads/a.png".into(), "/uploads/a.png".into()],
        }
    }

    #[test]
    fn append_list_confirm() {
        let store = memory_store();
        let a = PendingWrite::create_post(post_draft("a"));
        let b = PendingWrite::vote(VoteTarget::Post("p7".into()), true);
        store.append(a.clone());
        store.append(b.clone());

        assert_eq!(store.list_pending(None), vec![a.clone(), b.clone()]);
        assert_eq!(store.list_pending(Some("p7")), vec![b.clone()]);

        assert!(store.confirm(&a.local_id));
        assert!(!store.confirm(&a.local_id));
        assert_eq!(store.list_pending(None), vec![b]);
        assert_eq!(store.backend().records().len(), 3);
    }

    #[test]
    fn materialize_projects_pending_creates() {
        let store = memory_store();
        let post = PendingWrite::create_post(post_draft("hello"));
        let post_id = post.local_id.to_string();
        store.append(post.clone());
        store.append(PendingWrite::create_comment(CommentDraft {
            post_id: post_id.clone(),
            author_id: "u1".into(),
            author: "Ada".into(),
            content: "first".into(),
            image: Some("shot.jpg".into()),
        }));
        store.append(PendingWrite::delete("p9"));

        let out = store.materialize();
        assert_eq!(out.len(), 2);
        let Materialized::Item(item) = &out[0] else { panic!("expected item") };
        assert_eq!(item.id, post_id);
        assert_eq!(item.origin, Origin::PendingLocal);
        assert_eq!(item.images, vec!["https://host/uploads/a.png".to_string()]);
        assert_eq!(item.comment_count, 1);
        assert_eq!(item.created_at, post.created_at);

        let Materialized::Comment(comment) = &out[1] else { panic!("expected comment") };
        assert_eq!(comment.post_id, post_id);
        assert_eq!(comment.image_ref.as_deref(), Some("https://host/uploads/shot.jpg"));
        assert!(comment.is_pending());
    }

    #[test]
    fn discard_for_removes_dependent_writes() {
        let store = memory_store();
        let post = PendingWrite::create_post(post_draft("x"));
        let id = post.local_id.to_string();
        store.append(post);
        store.append(PendingWrite::vote(VoteTarget::Post(id.clone()), true));
        store.append(PendingWrite::create_comment(CommentDraft {
            post_id: id.clone(),
            author_id: "u1".into(),
            content: "c".into(),
            ..Default::default()
        }));
        store.append(PendingWrite::delete("other"));

        assert_eq!(store.discard_for(&id).len(), 3);
        assert_eq!(store.len(), 1);
        assert_eq!(store.backend().records().len(), 1);
    }

    #[test]
    fn replace_updates_in_place() {
        let store = memory_store();
        let mut post = PendingWrite::create_post(post_draft("old"));
        store.append(post.clone());
        store.append(PendingWrite::delete("p1"));

        if let WritePayload::Post(draft) = &mut post.payload {
            EditPatch {
                title: Some("new".into()),
                ..Default::default()
            }
            .apply_to_draft(draft);
        }
        assert!(store.replace(post.clone()));
        let pending = store.list_pending(None);
        assert_eq!(pending[0], post);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn failed_durable_write_still_updates_memory() {
        let store = memory_store();
        store.backend().fail_next(1);
        let w = PendingWrite::delete("p1");
        store.append(w.clone());

        assert_eq!(store.list_pending(None), vec![w.clone()]);
        assert!(!store.is_durable());
        assert!(store.backend().records().is_empty());

        // Next mutation rewrites everything.
        let v = PendingWrite::delete("p2");
        store.append(v.clone());
        assert!(store.is_durable());
        assert_eq!(
            store.backend().records(),
            vec![JournalRecord::Append(w), JournalRecord::Append(v)]
        );
    }

    #[test]
    fn flush_restores_durability() {
        let store = memory_store();
        store.backend().fail_next(1);
        store.append(PendingWrite::delete("p1"));
        assert!(!store.is_durable());
        store.flush().unwrap();
        assert!(store.is_durable());
        assert_eq!(store.backend().records().len(), 1);
    }

    #[tokio::test]
    async fn background_retry_restores_durability() {
        let store = memory_store();
        store.backend().fail_next(2);
        store.append(PendingWrite::delete("p1"));
        assert!(!store.is_durable());

        for _ in 0..200 {
            if store.is_durable() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(store.is_durable());
        assert_eq!(store.backend().records().len(), 1);
    }

    #[test]
    fn reopen_preserves_pending_and_compacts() {
        let dir = tempfile::tempdir().unwrap();
        let (keep, gone) = (PendingWrite::delete("p1"), PendingWrite::delete("p2"));
        {
            let journal = FileJournal::open_namespace(dir.path(), "u1", SyncMode::EveryWrite).unwrap();
            let store = LocalFallbackStore::open("u1", journal, fast_config(), resolver()).unwrap();
            store.append(keep.clone());
            store.append(gone.clone());
            store.confirm(&gone.local_id);
        }

        let journal = FileJournal::open_namespace(dir.path(), "u1", SyncMode::EveryWrite).unwrap();
        let store = LocalFallbackStore::open("u1", journal, fast_config(), resolver()).unwrap();
        assert_eq!(store.list_pending(None), vec![keep.clone()]);
        assert_eq!(store.backend().load().unwrap(), vec![JournalRecord::Append(keep)]);
    }
}
