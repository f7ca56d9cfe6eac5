//! Local fallback storage for the content reconciliation engine.
//!
//! Writes that the remote source has not confirmed are journaled here so
//! that a restart never loses them. The journal is an append-only,
//! CRC-framed log of [`JournalRecord`]s replayed on open and compacted once
//! entries are confirmed.
//!
//! # Storage Backends
//!
//! All journal backends implement [`JournalBackend`]:
//!
//! - [`FileJournal`] -- one segment file per namespace (user id)
//! - [`MemoryJournal`] -- in-memory, with failure injection for tests
//!
//! # Design Rules
//!
//! 1. The in-memory journal is updated before the durable write.
//! 2. A failed durable write is logged and retried in the background; it is
//!    never reported to the caller.
//! 3. While a retry is outstanding, every write rewrites the whole journal.
//! 4. All mutation goes through `append`, `confirm` and `discard_for`.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod record;
pub mod store;

pub use backend::JournalBackend;
pub use cache::{KeyValueCache, MyItemsIndex, ProfileImageCache};
pub use config::{JournalConfig, SyncMode};
pub use error::{JournalError, JournalResult};
pub use file::FileJournal;
pub use memory::MemoryJournal;
pub use record::JournalRecord;
pub use store::{LocalFallbackStore, Materialized};
