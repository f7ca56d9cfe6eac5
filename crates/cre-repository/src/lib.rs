//! High-level API of the content reconciliation engine.
//!
//! [`PostRepository`] is what an application talks to. Every write goes to
//! the remote source first; when that fails the write is journaled and the
//! caller gets a pending-local entity instead of an error. [`refresh`] and
//! [`sync_pending`] reconcile the remote view with the journal.
//!
//! [`refresh`]: PostRepository::refresh
//! [`sync_pending`]: PostRepository::sync_pending

pub mod comments;
pub mod config;
pub mod error;
pub mod repository;
pub mod sync;

pub use config::{EngineConfig, RepositoryConfig};
pub use error::{RepoError, RepoResult};
pub use repository::PostRepository;
pub use sync::SyncReport;

pub use cre_votes::{ContestVote, RankedEntry, ToggleOutcome, VoteMode};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use cre_image::{ImageResolver, ResolverConfig};
    use cre_journal::{JournalConfig, LocalFallbackStore, MemoryJournal};
    use cre_remote::InMemoryRemote;
    use cre_types::PostDraft;

    use crate::{PostRepository, RepositoryConfig};

    pub(crate) type TestRepo = PostRepository<Arc<InMemoryRemote>, MemoryJournal>;

    /// A repository for user `u1` over `remote`, resolving against
    /// `https://host`.
    pub(crate) fn repo_with(remote: Arc<InMemoryRemote>) -> TestRepo {
        let resolver = ImageResolver::new(&ResolverConfig::with_base_url("https://host"));
        let journal =
            LocalFallbackStore::open("u1", MemoryJournal::new(), JournalConfig::default(), resolver.clone())
                .unwrap();
        PostRepository::new(remote, journal, resolver, RepositoryConfig::for_user("u1"))
    }

    pub(crate) fn draft(category: &str, title: &str) -> PostDraft {
        PostDraft {
            author_id: "u1".into(),
            author: "Ada".into(),
            category: category.into(),
            title: title.into(),
            content: "body".into(),
            images: vec!["uploads/a.png".into()],
        }
    }
}
