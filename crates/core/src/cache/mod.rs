//! TTL caches over the directory.
//!
//! [`IdentityCache`] answers "who is this foreign id" with per-id records
//! and lazy refresh; [`DirectoryCache`] serves bulk queries from a
//! directory-wide snapshot rebuilt under a single-flight lock.

pub mod directory;
pub mod identity;

pub use directory::DirectoryCache;
pub use identity::IdentityCache;
