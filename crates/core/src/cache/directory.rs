//! Directory-wide person snapshot with lazy TTL refresh.
//!
//! [`DirectoryCache`] serves read-mostly bulk queries (lookup by directory
//! username, enumerate everyone) from a snapshot rebuilt at most once per
//! TTL. Unlike the identity cache it never raises: a failed resync keeps
//! the stale snapshot serving and leaves the timestamp untouched so the
//! next access retries immediately.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{CacheConfig, DirectoryConfig};
use crate::directory::attrs;
use crate::directory::connection::{DirectoryConnector, DirectoryEntry, DirectorySession};
use crate::errors::DirectoryError;
use crate::models::PersonRecord;

/// Attributes requested when building the snapshot.
const ROSTER_ATTRS: &[&str] = &[
    attrs::ATTR_UID,
    attrs::ATTR_COMMON_NAME,
    attrs::ATTR_MEMBER_OF,
    attrs::ATTR_NICKNAME,
    attrs::ATTR_FOREIGN_ID,
    attrs::ATTR_DATE_OF_BIRTH,
    attrs::ATTR_SAFETY_TEST_DATE,
    attrs::ATTR_HAS_KEY,
    attrs::ATTR_SIGNED_SAFETY_FORM,
    attrs::ATTR_ACCOUNT_LOCK,
];

#[derive(Default)]
struct RosterState {
    /// Keyed by lower-cased username.
    people: HashMap<String, PersonRecord>,
    last_synced_at: Option<DateTime<Utc>>,
}

/// Directory-wide person snapshot cache.
///
/// All state sits behind one async mutex held across the sync round trip,
/// so concurrent callers finding a stale snapshot collapse into a single
/// directory search.
pub struct DirectoryCache<C: DirectoryConnector> {
    connector: Arc<C>,
    people_base: String,
    admin_groups: Vec<String>,
    ttl: Duration,
    state: Mutex<RosterState>,
}

impl<C: DirectoryConnector> DirectoryCache<C> {
    /// Create a cache over `connector` using the configured people
    /// subtree, admin groups, and TTL.
    pub fn new(connector: Arc<C>, directory: &DirectoryConfig, cache: &CacheConfig) -> Self {
        info!(
            ttl_secs = cache.directory_ttl_secs,
            "initializing directory snapshot cache"
        );
        Self {
            connector,
            people_base: directory.people_base.clone(),
            admin_groups: directory.admin_groups.clone(),
            ttl: Duration::seconds(cache.directory_ttl_secs as i64),
            state: Mutex::new(RosterState::default()),
        }
    }

    /// Look up one person by directory username, case-insensitively.
    /// `None` means "no such person", never an error.
    pub async fn get_by_username(&self, username: &str) -> Option<PersonRecord> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
        state.people.get(&username.to_lowercase()).cloned()
    }

    /// Return the full snapshot. Order is unspecified.
    pub async fn get_all(&self) -> Vec<PersonRecord> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
        state.people.values().cloned().collect()
    }

    /// Resync now if the snapshot is older than the TTL.
    pub async fn refresh_if_stale(&self) {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await;
    }

    /// Drop the snapshot and force a full resync on next access. Returns
    /// how many entries were dropped.
    pub async fn invalidate(&self) -> usize {
        let mut state = self.state.lock().await;
        let count = state.people.len();
        state.people.clear();
        state.last_synced_at = None;
        info!(count, "directory snapshot invalidated");
        count
    }

    /// Resync when stale. Swallows every directory error: the stale
    /// snapshot keeps serving and the timestamp is left untouched, so the
    /// next access retries instead of waiting out a full TTL.
    async fn refresh_locked(&self, state: &mut RosterState) {
        let stale = match state.last_synced_at {
            Some(at) => Utc::now() - at > self.ttl,
            None => true,
        };
        if !stale {
            return;
        }

        match self.sync(state).await {
            Ok(count) => {
                state.last_synced_at = Some(Utc::now());
                info!(count, "directory snapshot synced");
            }
            Err(err @ DirectoryError::DuplicateEntry(_)) => {
                error!(error = %err, "directory snapshot sync failed");
            }
            Err(err) => {
                warn!(error = %err, "directory snapshot sync failed, keeping stale snapshot");
            }
        }
    }

    /// Rebuild the snapshot map wholesale from a full subtree search.
    async fn sync(&self, state: &mut RosterState) -> Result<usize, DirectoryError> {
        debug!(base = %self.people_base, "syncing directory snapshot");
        let mut session = self.connector.connect().await?;
        let outcome = self.fetch_people(&mut session).await;
        session.close().await;

        let people = outcome?;
        let count = people.len();
        state.people = people;
        Ok(count)
    }

    async fn fetch_people(
        &self,
        session: &mut C::Session,
    ) -> Result<HashMap<String, PersonRecord>, DirectoryError> {
        let filter = format!("(objectClass={})", attrs::PERSON_OBJECT_CLASS);
        let entries = session
            .search_entries(&self.people_base, &filter, ROSTER_ATTRS)
            .await?;

        let mut people = HashMap::with_capacity(entries.len());
        for entry in entries {
            let Some(record) = self.person_from_entry(&entry) else {
                continue;
            };
            let key = record.username.to_lowercase();
            if let Some(previous) = people.insert(key, record) {
                return Err(DirectoryError::DuplicateEntry(format!(
                    "username '{}' appears more than once",
                    previous.username
                )));
            }
        }
        Ok(people)
    }

    /// Map one search entry to a person record. Entries missing the
    /// structural attributes are skipped with a warning rather than
    /// aborting the whole sync.
    fn person_from_entry(&self, entry: &DirectoryEntry) -> Option<PersonRecord> {
        let Some(username) = entry.attrs.first(attrs::ATTR_UID) else {
            warn!(dn = %entry.dn, "skipping person entry without username");
            return None;
        };
        let Some(common_name) = entry.attrs.first(attrs::ATTR_COMMON_NAME) else {
            warn!(dn = %entry.dn, "skipping person entry without common name");
            return None;
        };

        let foreign_id = match entry.attrs.first(attrs::ATTR_FOREIGN_ID) {
            Some(raw) => match raw.parse::<i64>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(dn = %entry.dn, value = raw, "unparseable foreign id attribute");
                    None
                }
            },
            None => None,
        };

        Some(PersonRecord {
            username: username.to_string(),
            common_name: common_name.to_string(),
            date_of_birth: entry.attrs.date(attrs::ATTR_DATE_OF_BIRTH, &entry.dn),
            safety_test_date: entry.attrs.date(attrs::ATTR_SAFETY_TEST_DATE, &entry.dn),
            is_admin: attrs::member_of_any(&entry.attrs, &self.admin_groups),
            nickname: entry.attrs.first(attrs::ATTR_NICKNAME).map(str::to_string),
            foreign_id,
            has_key: entry.attrs.flag(attrs::ATTR_HAS_KEY),
            signed_safety_form: entry.attrs.flag(attrs::ATTR_SIGNED_SAFETY_FORM),
            account_locked: Some(entry.attrs.has(attrs::ATTR_ACCOUNT_LOCK)),
        })
    }
}
