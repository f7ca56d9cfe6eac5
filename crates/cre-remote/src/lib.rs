//! The remote source as seen by the reconciliation engine.
//!
//! The engine does not know about HTTP. It talks to a [`RemoteSource`]
//! whose calls are async and fail closed with a [`RemoteError`]. Payloads
//! are decoded leniently and [`Normalizer`] turns them into the data model
//! without ever failing: absent or mistyped fields become empty strings,
//! zero, or empty sets.

pub mod error;
pub mod memory;
pub mod normalize;
pub mod payload;
pub mod transport;

pub use error::{RemoteError, RemoteResult};
pub use memory::{InMemoryRemote, RemoteOp};
pub use normalize::Normalizer;
pub use payload::{CommentPayload, ItemDetailPayload, ItemPayload, RichCommentPayload};
pub use transport::RemoteSource;
