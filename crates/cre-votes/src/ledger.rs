use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use cre_remote::{RemoteError, RemoteSource};
use cre_types::{Comment, ItemId, KeyedLocks, PendingWrite, UserId, VoteTarget};

use crate::error::{VoteError, VoteResult};

/// State of one `(target, user)` pair after a vote operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub liked: bool,
    pub like_count: u64,
    /// `false` when the pair was already in the requested state.
    pub changed: bool,
}

/// What to do when a user votes in a contest where they already hold a vote
/// on another entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VoteMode {
    RefuseIfVoted,
    #[default]
    WithdrawPreviousAndVote,
}

/// Result of a synced like/unlike.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteReceipt {
    pub target: VoteTarget,
    pub outcome: ToggleOutcome,
    /// Votes that did not reach the remote source and belong in the journal.
    pub pending: Vec<PendingWrite>,
}

/// Result of a contest vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContestVote {
    pub post_id: ItemId,
    pub entry_id: ItemId,
    /// Whether the user now holds a vote on `entry_id`. `false` when the
    /// call withdrew an existing vote on it.
    pub voted: bool,
    /// Entries the user's vote was taken from.
    pub withdrawn: Vec<ItemId>,
    /// `false` when the entry was already in the requested state.
    pub changed: bool,
    pub pending: Vec<PendingWrite>,
}

struct ContestPlan {
    withdrawn: Vec<ItemId>,
    voted: bool,
    changed: bool,
}

#[derive(Default)]
struct LedgerState {
    votes: HashMap<VoteTarget, BTreeSet<UserId>>,
    /// Contest post id to the ids of its entries.
    contests: HashMap<ItemId, BTreeSet<ItemId>>,
}

impl LedgerState {
    fn count(&self, target: &VoteTarget) -> u64 {
        self.votes.get(target).map_or(0, |users| users.len() as u64)
    }

    fn has(&self, target: &VoteTarget, user: &str) -> bool {
        self.votes.get(target).is_some_and(|users| users.contains(user))
    }

    fn set(&mut self, target: &VoteTarget, user: &str, liked: bool) -> ToggleOutcome {
        let users = self.votes.entry(target.clone()).or_default();
        let changed = if liked {
            users.insert(user.to_string())
        } else {
            users.remove(user)
        };
        ToggleOutcome {
            liked,
            like_count: users.len() as u64,
            changed,
        }
    }

    /// Entries of `post_id` the user currently votes for.
    fn held(&self, post_id: &str, user: &str) -> Vec<ItemId> {
        self.contests
            .get(post_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| self.has(&VoteTarget::Comment((*e).clone()), user))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Who voted for what, plus contest entry membership.
///
/// Local mutations are synchronous and happen before any remote call.
/// Contest votes for the same `(post, user)` pair are serialized so the
/// single-active-vote rule holds under concurrent calls.
#[derive(Default)]
pub struct VoteLedger {
    state: RwLock<LedgerState>,
    contest_locks: KeyedLocks,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip `user`'s vote on `target`.
    pub fn toggle(&self, target: &VoteTarget, user: &str) -> ToggleOutcome {
        let mut state = self.write();
        let liked = !state.has(target, user);
        state.set(target, user, liked)
    }

    /// Put `user`'s vote on `target` into the requested state. A no-op when
    /// it is already there.
    pub fn set_vote(&self, target: &VoteTarget, user: &str, liked: bool) -> ToggleOutcome {
        self.write().set(target, user, liked)
    }

    /// Replace the membership of `target` with what a fetch reported.
    pub fn observe(&self, target: &VoteTarget, liked_by: BTreeSet<UserId>) {
        self.write().votes.insert(target.clone(), liked_by);
    }

    /// Record the entries of a contest post. Comments without an image are
    /// not entries and are skipped. Each entry's membership is observed when
    /// it is complete (its size matches the reported count).
    pub fn register_entries(&self, post_id: &str, entries: &[Comment]) {
        let mut state = self.write();
        let mut ids = BTreeSet::new();
        for entry in entries.iter().filter(|c| c.is_entry()) {
            ids.insert(entry.id.clone());
            if entry.liked_by.len() as u64 == entry.like_count {
                state
                    .votes
                    .insert(VoteTarget::Comment(entry.id.clone()), entry.liked_by.clone());
            }
        }
        debug!(post_id, entries = ids.len(), "contest entries registered");
        state.contests.insert(post_id.to_string(), ids);
    }

    /// Add a single entry to a contest without touching the others.
    pub fn add_entry(&self, post_id: &str, entry_id: &str) {
        self.write()
            .contests
            .entry(post_id.to_string())
            .or_default()
            .insert(entry_id.to_string());
    }

    pub fn liked_by(&self, target: &VoteTarget) -> BTreeSet<UserId> {
        self.read().votes.get(target).cloned().unwrap_or_default()
    }

    /// Membership if the ledger has any knowledge of `target`.
    pub fn membership(&self, target: &VoteTarget) -> Option<BTreeSet<UserId>> {
        self.read().votes.get(target).cloned()
    }

    pub fn like_count(&self, target: &VoteTarget) -> u64 {
        self.read().count(target)
    }

    /// The entry of `post_id` the user votes for, if any.
    pub fn active_vote(&self, post_id: &str, user: &str) -> Option<ItemId> {
        self.read().held(post_id, user).into_iter().next()
    }

    /// The contest post `entry_id` is registered under, if any.
    pub fn contest_of(&self, entry_id: &str) -> Option<ItemId> {
        self.read()
            .contests
            .iter()
            .find(|(_, entries)| entries.contains(entry_id))
            .map(|(post_id, _)| post_id.clone())
    }

    pub fn entries(&self, post_id: &str) -> Vec<ItemId> {
        self.read()
            .contests
            .get(post_id)
            .map(|e| e.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Move everything known under `old` to `new_id` (a local id was
    /// confirmed under a server id).
    pub fn rename(&self, old: &VoteTarget, new_id: &str) {
        let mut state = self.write();
        if let Some(users) = state.votes.remove(old) {
            state.votes.insert(old.with_id(new_id), users);
        }
        if let VoteTarget::Comment(old_id) = old {
            for entries in state.contests.values_mut() {
                if entries.remove(old_id) {
                    entries.insert(new_id.to_string());
                }
            }
        }
        if let VoteTarget::Post(old_id) = old {
            if let Some(entries) = state.contests.remove(old_id) {
                state.contests.insert(new_id.to_string(), entries);
            }
        }
    }

    /// Drop all knowledge of a deleted target.
    pub fn forget(&self, target: &VoteTarget) {
        let mut state = self.write();
        state.votes.remove(target);
        match target {
            VoteTarget::Post(id) => {
                state.contests.remove(id);
            }
            VoteTarget::Comment(id) => {
                for entries in state.contests.values_mut() {
                    entries.remove(id);
                }
            }
        }
    }

    /// Toggle locally, then tell the remote source.
    pub async fn toggle_synced<R>(&self, remote: &R, target: &VoteTarget, user: &str) -> VoteReceipt
    where
        R: RemoteSource + ?Sized,
    {
        let outcome = self.toggle(target, user);
        self.sync(remote, target, outcome).await
    }

    /// Like (`liked == true`) or unlike locally, then tell the remote
    /// source. Nothing is sent when the vote was already in that state.
    pub async fn set_synced<R>(
        &self,
        remote: &R,
        target: &VoteTarget,
        user: &str,
        liked: bool,
    ) -> VoteReceipt
    where
        R: RemoteSource + ?Sized,
    {
        let outcome = self.set_vote(target, user, liked);
        if !outcome.changed {
            return VoteReceipt {
                target: target.clone(),
                outcome,
                pending: Vec::new(),
            };
        }
        self.sync(remote, target, outcome).await
    }

    async fn sync<R>(&self, remote: &R, target: &VoteTarget, outcome: ToggleOutcome) -> VoteReceipt
    where
        R: RemoteSource + ?Sized,
    {
        let pending = match remote.set_vote(target, outcome.liked).await {
            Ok(()) => None,
            Err(e) => absorb(target, outcome.liked, e),
        };
        VoteReceipt {
            target: target.clone(),
            outcome,
            pending: pending.into_iter().collect(),
        }
    }

    /// Vote for `entry_id` in the contest `post_id`.
    ///
    /// Voting for the entry the user already votes for withdraws that vote.
    /// Otherwise any vote the user holds on another entry is withdrawn first,
    /// or the call fails with [`VoteError::Conflict`] under
    /// [`VoteMode::RefuseIfVoted`]. Local state changes before the remote
    /// calls. If the remote source rejects the new vote, both steps are
    /// undone, provided nothing else changed the ledger in between.
    pub async fn cast_contest_vote<R>(
        &self,
        remote: &R,
        post_id: &str,
        entry_id: &str,
        user: &str,
        mode: VoteMode,
    ) -> VoteResult<ContestVote>
    where
        R: RemoteSource + ?Sized,
    {
        self.contest_vote(remote, post_id, entry_id, user, mode, None).await
    }

    /// Like (`liked == true`) or unlike a contest entry under the contest
    /// rules. Nothing changes when the entry is already in that state; a
    /// like otherwise behaves as [`cast_contest_vote`](Self::cast_contest_vote).
    pub async fn set_contest_vote<R>(
        &self,
        remote: &R,
        post_id: &str,
        entry_id: &str,
        user: &str,
        liked: bool,
        mode: VoteMode,
    ) -> VoteResult<ContestVote>
    where
        R: RemoteSource + ?Sized,
    {
        self.contest_vote(remote, post_id, entry_id, user, mode, Some(liked)).await
    }

    async fn contest_vote<R>(
        &self,
        remote: &R,
        post_id: &str,
        entry_id: &str,
        user: &str,
        mode: VoteMode,
        want: Option<bool>,
    ) -> VoteResult<ContestVote>
    where
        R: RemoteSource + ?Sized,
    {
        let _guard = self.contest_locks.lock(&format!("{post_id}/{user}")).await;
        let plan = self.plan_contest_vote(post_id, entry_id, user, mode, want)?;
        if !plan.changed {
            debug!(post_id, entry_id, user, voted = plan.voted, "contest vote already in place");
            return Ok(ContestVote {
                post_id: post_id.to_string(),
                entry_id: entry_id.to_string(),
                voted: plan.voted,
                withdrawn: Vec::new(),
                changed: false,
                pending: Vec::new(),
            });
        }

        let mut pending = Vec::new();
        let mut unliked = Vec::new();
        for previous in &plan.withdrawn {
            match remote.unlike_comment(previous).await {
                Ok(()) => unliked.push(previous.clone()),
                Err(e) => pending.extend(absorb(&VoteTarget::Comment(previous.clone()), false, e)),
            }
        }

        if plan.voted {
            match remote.like_comment(entry_id).await {
                Ok(()) => {}
                Err(RemoteError::Rejected(reason)) => {
                    warn!(post_id, entry_id, user, %reason, "contest vote rejected remotely");
                    if self.roll_back(post_id, entry_id, user, &plan.withdrawn) {
                        for previous in &unliked {
                            if let Err(e) = remote.like_comment(previous).await {
                                warn!(
                                    post_id,
                                    entry_id = %previous,
                                    error = %e,
                                    "sync discrepancy: previous contest vote not restored remotely"
                                );
                            }
                        }
                    }
                    return Err(VoteError::Rejected(reason));
                }
                Err(e) => pending.extend(absorb(&VoteTarget::Comment(entry_id.to_string()), true, e)),
            }
        }

        info!(
            post_id,
            entry_id,
            user,
            voted = plan.voted,
            withdrawn = plan.withdrawn.len(),
            pending = pending.len(),
            "contest vote applied"
        );
        Ok(ContestVote {
            post_id: post_id.to_string(),
            entry_id: entry_id.to_string(),
            voted: plan.voted,
            withdrawn: plan.withdrawn,
            changed: true,
            pending,
        })
    }

    /// Check the contest rules and apply both local steps under one lock.
    /// `want` is the requested state of the entry; `None` flips it.
    fn plan_contest_vote(
        &self,
        post_id: &str,
        entry_id: &str,
        user: &str,
        mode: VoteMode,
        want: Option<bool>,
    ) -> VoteResult<ContestPlan> {
        let mut state = self.write();
        let registered = state
            .contests
            .get(post_id)
            .is_some_and(|entries| entries.contains(entry_id));
        if !registered {
            return Err(VoteError::UnknownEntry {
                post_id: post_id.to_string(),
                entry_id: entry_id.to_string(),
            });
        }

        let held = state.held(post_id, user);
        let holds = held.iter().any(|e| e == entry_id);
        if want == Some(holds) {
            return Ok(ContestPlan {
                withdrawn: Vec::new(),
                voted: holds,
                changed: false,
            });
        }
        if holds {
            for e in &held {
                state.set(&VoteTarget::Comment(e.clone()), user, false);
            }
            return Ok(ContestPlan {
                withdrawn: held,
                voted: false,
                changed: true,
            });
        }

        if let (Some(existing), VoteMode::RefuseIfVoted) = (held.first(), mode) {
            return Err(VoteError::Conflict {
                post_id: post_id.to_string(),
                existing_entry: existing.clone(),
            });
        }

        for e in &held {
            state.set(&VoteTarget::Comment(e.clone()), user, false);
        }
        state.set(&VoteTarget::Comment(entry_id.to_string()), user, true);
        Ok(ContestPlan {
            withdrawn: held,
            voted: true,
            changed: true,
        })
    }

    /// Restore the votes a rejected contest vote replaced. Returns `false`
    /// when the ledger no longer shows the state that call produced.
    fn roll_back(&self, post_id: &str, entry_id: &str, user: &str, withdrawn: &[ItemId]) -> bool {
        let mut state = self.write();
        let entry = VoteTarget::Comment(entry_id.to_string());
        let untouched = state.has(&entry, user)
            && withdrawn
                .iter()
                .all(|e| !state.has(&VoteTarget::Comment(e.clone()), user));
        if !untouched {
            debug!(post_id, entry_id, user, "ledger moved on; contest rollback skipped");
            return false;
        }
        state.set(&entry, user, false);
        for e in withdrawn {
            state.set(&VoteTarget::Comment(e.clone()), user, true);
        }
        true
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().expect("lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().expect("lock poisoned")
    }
}

impl std::fmt::Debug for VoteLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("VoteLedger")
            .field("targets", &state.votes.len())
            .field("contests", &state.contests.len())
            .finish()
    }
}

/// Map a failed remote vote to a journal entry, or absorb it.
fn absorb(target: &VoteTarget, liked: bool, error: RemoteError) -> Option<PendingWrite> {
    match error {
        RemoteError::Transient(reason) => {
            warn!(%target, liked, %reason, "vote not delivered; journaling");
            Some(PendingWrite::vote(target.clone(), liked))
        }
        RemoteError::NotFound(_) => {
            debug!(%target, liked, "vote target gone remotely; absorbed");
            None
        }
        RemoteError::Rejected(reason) => {
            warn!(%target, liked, %reason, "sync discrepancy: vote rejected; kept until next fetch");
            None
        }
    }
}
