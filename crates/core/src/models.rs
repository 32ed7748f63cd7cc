//! Domain model types used throughout ChatDirSync.
//!
//! These types are the in-memory currency between the directory layer and
//! the caches.

use chrono::{DateTime, Duration, NaiveDate, Utc};

// ---------------------------------------------------------------------------
// Person record (directory-wide snapshot)
// ---------------------------------------------------------------------------

/// One person as seen in the directory-wide snapshot.
///
/// Rebuilt wholesale on every snapshot sync, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    /// Directory username (`uid`). Unique within one snapshot.
    pub username: String,
    /// Display name (`cn`).
    pub common_name: String,
    /// Date of birth, when the directory holds a parseable value.
    pub date_of_birth: Option<NaiveDate>,
    /// Day the person passed the safety test.
    pub safety_test_date: Option<NaiveDate>,
    /// Member of at least one configured admin group.
    pub is_admin: bool,
    /// Messaging-platform handle, when linked.
    pub nickname: Option<String>,
    /// Messaging-platform numeric id, when linked.
    pub foreign_id: Option<i64>,
    /// Holds a physical key to the lab.
    pub has_key: bool,
    /// Has signed the safety form.
    pub signed_safety_form: bool,
    /// Lock marker state (`Some(true)` when the account is locked).
    pub account_locked: Option<bool>,
}

// ---------------------------------------------------------------------------
// Identity record (per-foreign-id cache)
// ---------------------------------------------------------------------------

/// Directory-backed identity of one messaging-platform user.
///
/// Cached per foreign id and refreshed in place once stale.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    /// Distinguished name of the backing entry. Write operations and the
    /// refresh re-read target it.
    pub dn: String,
    /// Messaging-platform numeric id. Cache key, immutable for the
    /// lifetime of the record.
    pub foreign_id: i64,
    /// Directory username (`uid`).
    pub username: String,
    /// Display name (`cn`).
    pub common_name: String,
    /// Given name.
    pub given_name: String,
    /// Surname.
    pub surname: String,
    /// Day the person passed the safety test.
    pub safety_test_date: Option<NaiveDate>,
    /// Has signed the safety form.
    pub signed_safety_form: bool,
    /// Member of at least one configured admin group.
    pub is_admin: bool,
    /// Nickname this record was last reconciled with.
    pub nickname: Option<String>,
    /// When the record was last read back from the directory.
    pub last_refreshed_at: DateTime<Utc>,
}

impl IdentityRecord {
    /// Whether the record is older than `ttl` and must be re-checked
    /// against the directory before use.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        Utc::now() - self.last_refreshed_at > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(age_secs: i64) -> IdentityRecord {
        IdentityRecord {
            dn: "uid=alice,ou=people,dc=example,dc=com".into(),
            foreign_id: 42,
            username: "alice".into(),
            common_name: "Alice Rossi".into(),
            given_name: "Alice".into(),
            surname: "Rossi".into(),
            safety_test_date: None,
            signed_safety_form: true,
            is_admin: false,
            nickname: Some("alice".into()),
            last_refreshed_at: Utc::now() - Duration::seconds(age_secs),
        }
    }

    #[test]
    fn test_record_staleness() {
        let ttl = Duration::seconds(3600);
        assert!(!sample_record(10).is_stale(ttl));
        assert!(sample_record(7200).is_stale(ttl));
    }

    #[test]
    fn test_record_fresh_at_exact_ttl() {
        // Age equal to the TTL still counts as fresh; only strictly older
        // records trigger a refresh.
        let record = sample_record(0);
        assert!(!record.is_stale(Duration::seconds(3600)));
    }
}
