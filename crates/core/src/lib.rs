//! ChatDirSync core library.
//!
//! This crate provides the foundational components for resolving chat
//! identities against an LDAP directory: configuration, the directory
//! connection and search layer, TTL-based identity and roster caches, and
//! invite-code linking for accounts still being registered.

#![allow(async_fn_in_trait)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod errors;
pub mod invite;
pub mod models;

// Re-exports for convenience.
pub use cache::{DirectoryCache, IdentityCache};
pub use config::AppConfig;
pub use directory::{DirectoryConnector, DirectorySession, LdapConnector};
pub use errors::DirectoryError;
pub use invite::InviteLinker;
pub use models::{IdentityRecord, PersonRecord};
