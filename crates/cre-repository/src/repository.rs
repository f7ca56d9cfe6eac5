use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use cre_image::ImageResolver;
use cre_journal::{
    FileJournal, JournalBackend, LocalFallbackStore, Materialized, MyItemsIndex, ProfileImageCache,
};
use cre_remote::{ItemPayload, Normalizer, RemoteError, RemoteResult, RemoteSource};
use cre_types::{
    Comment, ContentItem, EditPatch, ItemId, KeyedLocks, Origin, PendingWrite, PostDraft,
    VoteTarget, WriteKind, WritePayload,
};
use cre_votes::VoteLedger;

use crate::config::{EngineConfig, RepositoryConfig};
use crate::error::{RepoError, RepoResult};

type Fetched = RemoteResult<Vec<ItemPayload>>;

#[derive(Default)]
pub(crate) struct ViewState {
    pub(crate) items: Vec<ContentItem>,
    /// Sequence number of the refresh that produced `items`.
    pub(crate) applied_seq: u64,
    /// Local id of a confirmed entity to its server id.
    pub(crate) aliases: HashMap<ItemId, ItemId>,
    /// Last merged remote comments per post, without pending ones.
    pub(crate) snapshots: HashMap<ItemId, Vec<Comment>>,
}

/// The engine's entry point: posts, comments, votes and the journal behind
/// them.
///
/// Generic over the remote source and the journal backend. In-memory state
/// sits behind `std::sync` locks that are never held across an `.await`;
/// optimistic changes are made before the first remote call.
pub struct PostRepository<R: RemoteSource, B: JournalBackend> {
    pub(crate) remote: R,
    pub(crate) journal: LocalFallbackStore<B>,
    pub(crate) votes: VoteLedger,
    pub(crate) normalizer: Normalizer,
    pub(crate) config: RepositoryConfig,
    pub(crate) write_locks: KeyedLocks,
    pub(crate) sync_lock: tokio::sync::Mutex<()>,
    pub(crate) view: RwLock<ViewState>,
    inflight: Mutex<HashMap<String, broadcast::Sender<Fetched>>>,
    refresh_seq: AtomicU64,
    profile_images: ProfileImageCache,
    pub(crate) my_items: MyItemsIndex,
    cache_dir: Option<PathBuf>,
}

impl<R: RemoteSource, B: JournalBackend> PostRepository<R, B> {
    /// A repository with in-memory caches.
    pub fn new(
        remote: R,
        journal: LocalFallbackStore<B>,
        resolver: ImageResolver,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            remote,
            journal,
            votes: VoteLedger::new(),
            normalizer: Normalizer::new(resolver),
            config,
            write_locks: KeyedLocks::new(),
            sync_lock: tokio::sync::Mutex::new(()),
            view: RwLock::new(ViewState::default()),
            inflight: Mutex::new(HashMap::new()),
            refresh_seq: AtomicU64::new(0),
            profile_images: ProfileImageCache::in_memory(),
            my_items: MyItemsIndex::in_memory(),
            cache_dir: None,
        }
    }

    /// Keep the profile-image and my-items caches under `dir`.
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.profile_images = ProfileImageCache::open(&dir, &self.config.user_id);
        self.my_items = MyItemsIndex::open(&dir, &self.config.user_id);
        self.cache_dir = Some(dir);
        self
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn journal(&self) -> &LocalFallbackStore<B> {
        &self.journal
    }

    pub fn votes(&self) -> &VoteLedger {
        &self.votes
    }

    pub fn resolver(&self) -> &ImageResolver {
        self.normalizer.resolver()
    }

    /// The last reconciled view, newest first.
    pub fn view(&self) -> Vec<ContentItem> {
        self.read_view().items.clone()
    }

    pub fn item(&self, id: &str) -> Option<ContentItem> {
        let id = self.resolve_id(id);
        self.read_view().items.iter().find(|i| i.id == id).cloned()
    }

    /// The current id of an entity: its server id once a local id was
    /// confirmed, otherwise `id` itself.
    pub fn resolve_id(&self, id: &str) -> ItemId {
        self.read_view()
            .aliases
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn pending_count(&self) -> usize {
        self.journal.len()
    }

    // ---- Refresh ----

    /// Fetch `categories` and reconcile them with the journal.
    ///
    /// Concurrent callers asking for a category already in flight share that
    /// fetch. A result that completes after a newer refresh has been applied
    /// is discarded and the newer view is returned instead.
    pub async fn refresh(&self, categories: &[&str]) -> Vec<ContentItem> {
        let seq = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut fetched = Vec::new();
        let mut failed = Vec::new();
        for &category in categories {
            match self.fetch_category(category).await {
                Ok(payloads) => {
                    for payload in payloads {
                        let item = self.normalizer.item(payload);
                        if item.id.is_empty() {
                            debug!(category, "dropping listed item without id");
                            continue;
                        }
                        fetched.push(item);
                    }
                }
                Err(e) => {
                    warn!(category, error = %e, "category fetch failed; keeping previous items");
                    failed.push(category.to_string());
                }
            }
        }

        self.confirm_landed_creates(&fetched);

        let mut delivered_votes = Vec::new();
        if self.config.replay_on_refresh && !self.journal.is_empty() {
            let report = self.sync_pending().await;
            delivered_votes = report.voted;
            fetched.retain(|item| !report.deleted.contains(&item.id));
            for updated in report.updated {
                if let Some(slot) = fetched.iter_mut().find(|i| i.id == updated.id) {
                    *slot = updated;
                }
            }
            fetched.extend(
                report
                    .created
                    .into_iter()
                    .filter(|item| categories.contains(&item.category.as_str())),
            );
        }

        self.apply_refresh(seq, categories, fetched, &failed, &delivered_votes)
    }

    /// One `list_items` call per category at a time; late callers subscribe.
    async fn fetch_category(&self, category: &str) -> Fetched {
        let role = {
            let mut inflight = self.lock_inflight();
            if let Some(tx) = inflight.get(category) {
                FetchRole::Follow(tx.subscribe())
            } else {
                let (tx, _) = broadcast::channel(1);
                inflight.insert(category.to_string(), tx.clone());
                FetchRole::Lead(tx)
            }
        };
        match role {
            FetchRole::Lead(tx) => self.lead_fetch(category, tx).await,
            FetchRole::Follow(mut rx) => {
                debug!(category, "joining in-flight fetch");
                rx.recv().await.unwrap_or_else(|_| {
                    Err(RemoteError::Transient(format!(
                        "shared fetch of {category} was abandoned"
                    )))
                })
            }
        }
    }

    async fn lead_fetch(&self, category: &str, tx: broadcast::Sender<Fetched>) -> Fetched {
        let guard = InflightGuard {
            inflight: &self.inflight,
            category,
            armed: true,
        };
        let result = self.remote.list_items(category).await;
        {
            let mut inflight = self.lock_inflight();
            inflight.remove(category);
            let _ = tx.send(result.clone());
        }
        guard.disarm();
        result
    }

    /// Pending creates whose content shows up in a listing have landed
    /// (the request failed after the server committed it). Confirm them
    /// instead of sending them again.
    fn confirm_landed_creates(&self, fetched: &[ContentItem]) {
        let mut taken: HashSet<&str> = HashSet::new();
        for write in self.journal.list_pending(None) {
            let WritePayload::Post(draft) = &write.payload else {
                continue;
            };
            let fingerprint = draft.fingerprint();
            let Some(landed) = fetched
                .iter()
                .find(|item| !taken.contains(item.id.as_str()) && item.fingerprint() == fingerprint)
            else {
                continue;
            };
            taken.insert(&landed.id);
            info!(local_id = %write.local_id, id = %landed.id, "pending create already landed");
            self.journal.confirm(&write.local_id);
            self.adopt_confirmed(&write.local_id.to_string(), &landed.id);
        }
    }

    fn apply_refresh(
        &self,
        seq: u64,
        categories: &[&str],
        fetched: Vec<ContentItem>,
        failed: &[String],
        delivered_votes: &[(VoteTarget, bool)],
    ) -> Vec<ContentItem> {
        let mut view = self.write_view();
        if seq < view.applied_seq {
            debug!(seq, applied = view.applied_seq, "stale refresh discarded");
            return view.items.clone();
        }

        let mut items: Vec<ContentItem> = self
            .journal
            .materialize()
            .into_iter()
            .filter_map(|m| match m {
                Materialized::Item(item) => Some(item),
                Materialized::Comment(_) => None,
            })
            .filter(|item| categories.contains(&item.category.as_str()))
            .collect();
        items.extend(fetched);
        items.extend(
            view.items
                .iter()
                .filter(|item| !item.is_pending() && failed.contains(&item.category))
                .cloned(),
        );

        let items = self.overlay_pending(dedup_items(items), delivered_votes);
        view.items = items.clone();
        view.applied_seq = seq;
        debug!(seq, items = items.len(), "view refreshed");
        items
    }

    /// Apply pending deletes, edits and votes, then take vote membership
    /// from the ledger. Sorted newest first.
    ///
    /// `delivered_votes` were sent after `items` was fetched, so the fetched
    /// membership does not show them yet.
    fn overlay_pending(
        &self,
        mut items: Vec<ContentItem>,
        delivered_votes: &[(VoteTarget, bool)],
    ) -> Vec<ContentItem> {
        let pending = self.journal.list_pending(None);
        let user = self.config.user_id.as_str();

        for item in &items {
            if item.liked_by.len() as u64 == item.like_count {
                self.votes.observe(&VoteTarget::Post(item.id.clone()), item.liked_by.clone());
            }
        }
        for (target, liked) in delivered_votes {
            self.votes.set_vote(target, user, *liked);
        }

        for write in &pending {
            match (&write.kind, &write.payload) {
                (WriteKind::Delete, _) => items.retain(|item| item.id != write.target_id),
                (WriteKind::Edit, WritePayload::Edit(patch)) => {
                    if let Some(item) = items.iter_mut().find(|i| i.id == write.target_id) {
                        apply_patch(item, patch);
                    }
                }
                (WriteKind::Like | WriteKind::Unlike, WritePayload::Vote(target @ VoteTarget::Post(_))) => {
                    self.votes.set_vote(target, user, write.kind == WriteKind::Like);
                }
                _ => {}
            }
        }

        for item in items.iter_mut() {
            if let Some(liked_by) = self.votes.membership(&VoteTarget::Post(item.id.clone())) {
                item.set_liked_by(liked_by);
            }
        }
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    // ---- Posts ----

    /// Create a post. Never fails except on validation: when the remote
    /// source cannot take the post it is journaled and returned as
    /// pending-local.
    pub async fn create(&self, draft: PostDraft) -> RepoResult<ContentItem> {
        draft.validate()?;
        let mut draft = draft;
        draft.images = self.resolver().resolve_strs(&draft.images);

        let item = match self.remote.create_item(&draft).await {
            Ok(payload) => {
                let item = self.normalizer.item(payload);
                if item.id.is_empty() {
                    warn!(title = %draft.title, "created item came back without id; journaling");
                    self.journal_create(draft)
                } else {
                    info!(id = %item.id, category = %item.category, "post created");
                    item
                }
            }
            Err(e) => {
                warn!(title = %draft.title, error = %e, "post create failed; journaling");
                self.journal_create(draft)
            }
        };

        self.my_items.add(&item.id);
        self.upsert_view(item.clone());
        Ok(item)
    }

    fn journal_create(&self, draft: PostDraft) -> ContentItem {
        let write = PendingWrite::create_post(draft.clone());
        let item = ContentItem {
            id: write.local_id.to_string(),
            origin: Origin::PendingLocal,
            author_id: draft.author_id,
            author: draft.author,
            category: draft.category,
            title: draft.title,
            content: draft.content,
            images: draft.images,
            like_count: 0,
            liked_by: Default::default(),
            comment_count: 0,
            created_at: write.created_at,
        };
        self.journal.append(write);
        item
    }

    /// Edit a post. A pending-local post has its journaled draft rewritten;
    /// a remote post is updated remotely, or the edit is journaled when the
    /// remote source is unreachable. Returns the updated post when it is in
    /// the view.
    pub async fn edit(&self, id: &str, patch: EditPatch) -> RepoResult<Option<ContentItem>> {
        patch.validate()?;
        let mut patch = patch;
        if let Some(images) = &patch.images {
            patch.images = Some(self.resolver().resolve_strs(images));
        }

        let id = self.resolve_id(id);
        let _guard = self.write_locks.lock(&id).await;

        if let Some(mut write) = self.pending_create(&id) {
            if let WritePayload::Post(draft) = &mut write.payload {
                patch.apply_to_draft(draft);
            }
            self.journal.replace(write);
            debug!(%id, "pending post edited in journal");
            return Ok(self.patch_view(&id, &patch));
        }

        let before = self.item(&id);
        let optimistic = self.patch_view(&id, &patch);
        match self.remote.update_item(&id, &patch).await {
            Ok(payload) => {
                let mut item = self.normalizer.item(payload);
                if item.id.is_empty() {
                    return Ok(optimistic);
                }
                if let Some(liked_by) = self.votes.membership(&VoteTarget::Post(item.id.clone())) {
                    item.set_liked_by(liked_by);
                }
                self.upsert_view(item.clone());
                Ok(Some(item))
            }
            Err(RemoteError::NotFound(_)) => {
                info!(%id, "edited post no longer exists remotely");
                self.remove_from_view(&id);
                Err(RepoError::NotFound(id))
            }
            Err(RemoteError::Rejected(reason)) => {
                warn!(%id, %reason, "edit rejected by remote");
                if let Some(before) = before {
                    self.upsert_view(before);
                }
                Err(RepoError::Rejected(reason))
            }
            Err(RemoteError::Transient(reason)) => {
                warn!(%id, %reason, "edit not delivered; journaling");
                self.journal.append(PendingWrite::edit(id, patch));
                Ok(optimistic)
            }
        }
    }

    /// Delete a post. It leaves the view at once. A pending-local post
    /// never reached the remote source and is only dropped from the
    /// journal.
    pub async fn remove(&self, id: &str) -> RepoResult<()> {
        let id = self.resolve_id(id);
        let _guard = self.write_locks.lock(&id).await;

        self.remove_from_view(&id);
        self.my_items.remove(&id);
        self.votes.forget(&VoteTarget::Post(id.clone()));
        self.write_view().snapshots.remove(&id);
        let discarded = self.journal.discard_for(&id);

        if discarded.iter().any(|w| w.kind == WriteKind::CreatePost) {
            debug!(%id, discarded = discarded.len(), "pending post removed locally");
            return Ok(());
        }

        match self.remote.delete_item(&id).await {
            Ok(()) => info!(%id, "post deleted"),
            Err(RemoteError::NotFound(_)) => debug!(%id, "post already gone remotely"),
            Err(e) => {
                warn!(%id, error = %e, "sync discrepancy: delete not applied remotely; journaling");
                self.journal.append(PendingWrite::delete(id));
            }
        }
        Ok(())
    }

    // ---- Local caches ----

    /// Ids of the posts `user` authored through this device, oldest first.
    pub fn my_items(&self, user: &str) -> Vec<ItemId> {
        let ids = if user == self.config.user_id {
            self.my_items.list()
        } else {
            match &self.cache_dir {
                Some(dir) => MyItemsIndex::open(dir, user).list(),
                None => Vec::new(),
            }
        };
        ids.iter().map(|id| self.resolve_id(id)).collect()
    }

    /// Remember `user`'s profile image. Unrecognised references are ignored.
    pub fn cache_profile_image(&self, user: &str, raw: &str) -> Option<String> {
        let url = self.resolver().resolve_str(raw)?;
        self.profile_images.put(user, &url);
        Some(url)
    }

    pub fn profile_image(&self, user: &str) -> Option<String> {
        self.profile_images.get(user)
    }

    // ---- Internals shared with comments and sync ----

    /// The journaled create of a pending-local post.
    pub(crate) fn pending_create(&self, id: &str) -> Option<PendingWrite> {
        self.journal
            .list_pending(Some(id))
            .into_iter()
            .find(|w| w.kind == WriteKind::CreatePost && w.local_id.to_string() == id)
    }

    pub(crate) fn is_pending_local(&self, id: &str) -> bool {
        self.journal
            .list_pending(Some(id))
            .iter()
            .any(|w| matches!(w.kind, WriteKind::CreatePost | WriteKind::CreateComment) && w.local_id.to_string() == id)
    }

    /// A local id was confirmed as `server_id`: alias it and move every
    /// reference over.
    pub(crate) fn adopt_confirmed(&self, local_id: &str, server_id: &str) {
        {
            let mut view = self.write_view();
            view.aliases.insert(local_id.to_string(), server_id.to_string());
            view.items.retain(|i| i.id != local_id);
            if let Some(snapshot) = view.snapshots.remove(local_id) {
                view.snapshots.insert(server_id.to_string(), snapshot);
            }
        }
        self.my_items.rename(local_id, server_id);
        self.votes.rename(&VoteTarget::Post(local_id.to_string()), server_id);
        self.votes.rename(&VoteTarget::Comment(local_id.to_string()), server_id);
        self.retarget_journal(local_id, server_id);
    }

    /// Point journaled writes that target `local_id` at `server_id`.
    fn retarget_journal(&self, local_id: &str, server_id: &str) {
        for mut write in self.journal.list_pending(Some(local_id)) {
            if write.target_id != local_id || write.local_id.to_string() == local_id {
                continue;
            }
            write.target_id = server_id.to_string();
            match &mut write.payload {
                WritePayload::Vote(target) => *target = target.with_id(server_id),
                WritePayload::Comment(draft) => draft.post_id = server_id.to_string(),
                _ => {}
            }
            self.journal.replace(write);
        }
    }

    pub(crate) fn upsert_view(&self, item: ContentItem) {
        let mut view = self.write_view();
        match view.items.iter_mut().find(|i| i.id == item.id) {
            Some(slot) => *slot = item,
            None => view.items.insert(0, item),
        }
    }

    pub(crate) fn update_view_item(&self, id: &str, f: impl FnOnce(&mut ContentItem)) -> Option<ContentItem> {
        let mut view = self.write_view();
        let item = view.items.iter_mut().find(|i| i.id == id)?;
        f(item);
        Some(item.clone())
    }

    fn patch_view(&self, id: &str, patch: &EditPatch) -> Option<ContentItem> {
        self.update_view_item(id, |item| apply_patch(item, patch))
    }

    fn remove_from_view(&self, id: &str) {
        self.write_view().items.retain(|i| i.id != id);
    }

    pub(crate) fn read_view(&self) -> RwLockReadGuard<'_, ViewState> {
        self.view.read().expect("lock poisoned")
    }

    pub(crate) fn write_view(&self) -> RwLockWriteGuard<'_, ViewState> {
        self.view.write().expect("lock poisoned")
    }

    fn lock_inflight(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Fetched>>> {
        self.inflight.lock().expect("lock poisoned")
    }
}

impl<R: RemoteSource> PostRepository<R, FileJournal> {
    /// A repository whose journal and caches live under
    /// `config.journal.dir`.
    pub fn open(remote: R, config: &EngineConfig) -> RepoResult<Self> {
        let dir = &config.journal.dir;
        let user = &config.repository.user_id;
        let backend = FileJournal::open_namespace(dir, user, config.journal.sync_mode)?;
        let resolver = ImageResolver::new(&config.resolver);
        let journal = LocalFallbackStore::open(user.clone(), backend, config.journal.clone(), resolver.clone())?;
        Ok(Self::new(remote, journal, resolver, config.repository.clone()).with_cache_dir(dir.clone()))
    }
}

impl<R: RemoteSource, B: JournalBackend> std::fmt::Debug for PostRepository<R, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.read_view();
        f.debug_struct("PostRepository")
            .field("user_id", &self.config.user_id)
            .field("items", &view.items.len())
            .field("aliases", &view.aliases.len())
            .field("pending", &self.journal.len())
            .finish()
    }
}

enum FetchRole {
    Lead(broadcast::Sender<Fetched>),
    Follow(broadcast::Receiver<Fetched>),
}

/// Removes an abandoned in-flight fetch so the next caller starts over.
struct InflightGuard<'a> {
    inflight: &'a Mutex<HashMap<String, broadcast::Sender<Fetched>>>,
    category: &'a str,
    armed: bool,
}

impl InflightGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Ok(mut inflight) = self.inflight.lock() {
                inflight.remove(self.category);
            }
        }
    }
}

fn apply_patch(item: &mut ContentItem, patch: &EditPatch) {
    if let Some(title) = &patch.title {
        item.title = title.clone();
    }
    if let Some(content) = &patch.content {
        item.content = content.clone();
    }
    if let Some(images) = &patch.images {
        item.images = images.clone();
    }
}

/// First occurrence wins.
fn dedup_items(items: Vec<ContentItem>) -> Vec<ContentItem> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|i| seen.insert(i.id.clone())).collect()
}
