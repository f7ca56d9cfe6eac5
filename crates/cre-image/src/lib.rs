//! Canonical image references.
//!
//! The remote source and the device report images in several shapes:
//! absolute URLs, bare filenames, storage-relative paths such as
//! `uploads/img.png`, leading-slash paths, and JSON objects wrapping any of
//! those. [`ImageResolver`] rewrites them all into one absolute form against
//! a configured base URL so that the rest of the engine can compare images
//! by string equality.

pub mod config;
pub mod resolver;

pub use config::ResolverConfig;
pub use resolver::ImageResolver;
