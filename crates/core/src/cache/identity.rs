//! Per-foreign-id identity cache.
//!
//! [`IdentityCache`] is the primary entry point for resolving a
//! messaging-platform numeric id to a directory-backed identity with
//! bounded staleness. Resolution results feed authorization decisions, so
//! directory failures are surfaced as typed errors rather than hidden
//! behind stale data.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{CacheConfig, DirectoryConfig};
use crate::directory::connection::{DirectoryConnector, DirectorySession};
use crate::directory::search::{self, SearchContext};
use crate::errors::DirectoryError;
use crate::models::IdentityRecord;

/// TTL cache mapping foreign ids to directory-backed identity records.
///
/// Thread-safe and intended to be shared via `Arc`. The map lock is never
/// held across a directory round trip, so two tasks refreshing the same
/// stale id may both hit the directory; refresh is idempotent and the
/// duplicates converge.
pub struct IdentityCache<C: DirectoryConnector> {
    connector: Arc<C>,
    people_base: String,
    admin_groups: Vec<String>,
    excluded_groups: Vec<String>,
    ttl: Duration,
    records: RwLock<HashMap<i64, IdentityRecord>>,
}

impl<C: DirectoryConnector> IdentityCache<C> {
    /// Create a cache over `connector` using the configured people
    /// subtree, group sets, and TTL.
    pub fn new(connector: Arc<C>, directory: &DirectoryConfig, cache: &CacheConfig) -> Self {
        info!(ttl_secs = cache.identity_ttl_secs, "initializing identity cache");
        Self {
            connector,
            people_base: directory.people_base.clone(),
            admin_groups: directory.admin_groups.clone(),
            excluded_groups: directory.excluded_groups.clone(),
            ttl: Duration::seconds(cache.identity_ttl_secs as i64),
            records: RwLock::new(HashMap::new()),
        }
    }

    fn context(&self) -> SearchContext<'_> {
        SearchContext {
            people_base: &self.people_base,
            admin_groups: &self.admin_groups,
            excluded_groups: &self.excluded_groups,
        }
    }

    /// Resolve `foreign_id` to an identity record.
    ///
    /// A fresh cached record is returned without touching the directory.
    /// A stale one is refreshed in place; if the refresh reports that the
    /// backing entry is gone, locked, incomplete, or ambiguous, the entry
    /// is evicted and one fresh lookup runs before the error (or the new
    /// record) reaches the caller. At most one directory session is used
    /// per call.
    pub async fn resolve(
        &self,
        foreign_id: i64,
        nickname: Option<&str>,
    ) -> Result<IdentityRecord, DirectoryError> {
        let cached = {
            let records = self.records.read().await;
            records.get(&foreign_id).cloned()
        };
        if let Some(ref record) = cached {
            if !record.is_stale(self.ttl) {
                debug!(foreign_id, "identity cache hit");
                return Ok(record.clone());
            }
        }

        let mut session = self.connector.connect().await?;
        let outcome = self
            .resolve_with_session(&mut session, cached, foreign_id, nickname)
            .await;
        session.close().await;
        outcome
    }

    async fn resolve_with_session(
        &self,
        session: &mut C::Session,
        cached: Option<IdentityRecord>,
        foreign_id: i64,
        nickname: Option<&str>,
    ) -> Result<IdentityRecord, DirectoryError> {
        let ctx = self.context();

        if let Some(mut record) = cached {
            match search::refresh_record(session, &ctx, &mut record, nickname).await {
                Ok(()) => {
                    let mut records = self.records.write().await;
                    records.insert(foreign_id, record.clone());
                    return Ok(record);
                }
                Err(err) if invalidates_entry(&err) => {
                    warn!(foreign_id, error = %err, "evicting cached identity");
                    let mut records = self.records.write().await;
                    records.remove(&foreign_id);
                }
                Err(err) => return Err(err),
            }
        }

        let record =
            search::find_by_foreign_id_with_nickname_fallback(session, &ctx, foreign_id, nickname)
                .await?;
        let mut records = self.records.write().await;
        records.insert(foreign_id, record.clone());
        Ok(record)
    }

    /// Drop every cached record. Returns how many were evicted.
    pub async fn delete_cache(&self) -> usize {
        let mut records = self.records.write().await;
        let count = records.len();
        records.clear();
        info!(count, "identity cache cleared");
        count
    }
}

/// Refresh failures that mean the cached entry is dead, as opposed to the
/// directory being temporarily unreachable.
fn invalidates_entry(err: &DirectoryError) -> bool {
    matches!(
        err,
        DirectoryError::AccountNotFound
            | DirectoryError::AccountLocked
            | DirectoryError::AccountNotCompleted { .. }
            | DirectoryError::DuplicateEntry(_)
    )
}
