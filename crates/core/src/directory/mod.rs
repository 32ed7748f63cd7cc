//! Directory access layer: the connection capability, attribute helpers,
//! and the search/reconciliation algorithms shared by the caches.
//!
//! The lookup hierarchy for resolving a foreign id is:
//! 1. Direct search by the foreign-id attribute
//! 2. Fallback: search by nickname among entries that have no foreign id
//!    yet, write the id back, and re-run the direct search

pub mod attrs;
pub mod connection;
pub mod search;

#[cfg(test)]
pub mod mock;

pub use attrs::{AttributeChange, AttributeMap};
pub use connection::{DirectoryConnector, DirectoryEntry, DirectorySession, LdapConnector};
