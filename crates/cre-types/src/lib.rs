//! Foundation types for the content reconciliation engine (CRE).
//!
//! Every other CRE crate depends on `cre-types`. It defines the entities the
//! engine reconciles and the journal records it persists.
//!
//! # Key Types
//!
//! - [`ContentItem`]: a post or competition, remote or pending-local
//! - [`Comment`]: a comment; contest entries are comments carrying an image
//! - [`RichComment`]: comment shape from the image-bearing source (no identity)
//! - [`Origin`]: server-confirmed vs. not-yet-confirmed marker
//! - [`PendingWrite`]: journal record for a write awaiting confirmation
//! - [`VoteTarget`]: what a like/vote applies to
//! - [`KeyedLocks`]: per-key async serialization of writes

pub mod content;
pub mod draft;
pub mod error;
pub mod ids;
pub mod locks;
pub mod write;

pub use content::{Comment, ContentFingerprint, ContentItem, Origin, RichComment};
pub use draft::{CommentDraft, EditPatch, PostDraft};
pub use error::TypeError;
pub use ids::{ItemId, LocalId, UserId};
pub use locks::KeyedLocks;
pub use write::{PendingWrite, VoteTarget, WriteKind, WritePayload};
