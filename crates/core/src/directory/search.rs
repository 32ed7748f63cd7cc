//! Directory search and reconciliation algorithms.
//!
//! These are the stateless lookup paths shared by the caches: resolve a
//! foreign id to exactly one person entry, falling back to a nickname match
//! with id write-back for entries that never learned their id, vet the
//! entry, and reconcile the stored nickname with the observed one.

use chrono::Utc;
use ldap3::ldap_escape;
use tracing::{debug, info};

use crate::directory::attrs::{self, AttributeChange};
use crate::directory::connection::{DirectoryEntry, DirectorySession};
use crate::errors::DirectoryError;
use crate::models::IdentityRecord;

/// Search parameters shared by every identity lookup.
#[derive(Debug, Clone, Copy)]
pub struct SearchContext<'a> {
    /// Subtree holding person entries.
    pub people_base: &'a str,
    /// Groups whose members are administrators.
    pub admin_groups: &'a [String],
    /// Groups whose members must appear not to exist.
    pub excluded_groups: &'a [String],
}

/// Attributes requested when materializing an [`IdentityRecord`].
const IDENTITY_ATTRS: &[&str] = &[
    attrs::ATTR_UID,
    attrs::ATTR_COMMON_NAME,
    attrs::ATTR_GIVEN_NAME,
    attrs::ATTR_SURNAME,
    attrs::ATTR_MEMBER_OF,
    attrs::ATTR_NICKNAME,
    attrs::ATTR_INVITE_CODE,
    attrs::ATTR_SAFETY_TEST_DATE,
    attrs::ATTR_SIGNED_SAFETY_FORM,
    attrs::ATTR_ACCOUNT_LOCK,
];

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Find the unique person entry whose foreign-id attribute equals
/// `foreign_id`.
pub async fn find_by_foreign_id<S: DirectorySession>(
    session: &mut S,
    ctx: &SearchContext<'_>,
    foreign_id: i64,
) -> Result<DirectoryEntry, DirectoryError> {
    let filter = format!(
        "(&(objectClass={})({}={}))",
        attrs::PERSON_OBJECT_CLASS,
        attrs::ATTR_FOREIGN_ID,
        foreign_id
    );
    debug!(foreign_id, "searching directory by foreign id");
    let mut entries = session
        .search_entries(ctx.people_base, &filter, IDENTITY_ATTRS)
        .await?;
    match entries.len() {
        0 => Err(DirectoryError::AccountNotFound),
        1 => Ok(entries.remove(0)),
        n => Err(DirectoryError::DuplicateEntry(format!(
            "{n} entries share foreign id {foreign_id}"
        ))),
    }
}

/// Resolve `foreign_id` to a vetted, reconciled [`IdentityRecord`].
///
/// When no entry carries the id yet and a nickname is available, a
/// secondary search finds the entry that was provisioned with that
/// nickname but no id, writes the id into it, and re-reads it through the
/// primary path so that the returned record reflects the write.
pub async fn find_by_foreign_id_with_nickname_fallback<S: DirectorySession>(
    session: &mut S,
    ctx: &SearchContext<'_>,
    foreign_id: i64,
    nickname: Option<&str>,
) -> Result<IdentityRecord, DirectoryError> {
    let entry = match find_by_foreign_id(session, ctx, foreign_id).await {
        Ok(entry) => entry,
        Err(DirectoryError::AccountNotFound) => {
            let Some(nickname) = nickname else {
                return Err(DirectoryError::AccountNotFound);
            };
            link_by_nickname(session, ctx, foreign_id, nickname).await?;
            find_by_foreign_id(session, ctx, foreign_id).await?
        }
        Err(e) => return Err(e),
    };

    vet_entry(&entry, ctx)?;
    let stored = entry.attrs.first(attrs::ATTR_NICKNAME);
    reconcile_nickname(session, &entry.dn, stored, nickname).await?;
    materialize_record(&entry, ctx, foreign_id, nickname)
}

/// Find the id-less entry provisioned with `nickname` and write
/// `foreign_id` into it.
async fn link_by_nickname<S: DirectorySession>(
    session: &mut S,
    ctx: &SearchContext<'_>,
    foreign_id: i64,
    nickname: &str,
) -> Result<(), DirectoryError> {
    let filter = format!(
        "(&(objectClass={})(!({}=*))({}={}))",
        attrs::PERSON_OBJECT_CLASS,
        attrs::ATTR_FOREIGN_ID,
        attrs::ATTR_NICKNAME,
        ldap_escape(nickname)
    );
    debug!(nickname, "searching directory by unlinked nickname");
    let mut entries = session.search_entries(ctx.people_base, &filter, &[]).await?;
    match entries.len() {
        0 => Err(DirectoryError::AccountNotFound),
        1 => {
            let entry = entries.remove(0);
            info!(dn = %entry.dn, foreign_id, "linking foreign id to entry found by nickname");
            session
                .modify_entry(
                    &entry.dn,
                    &[AttributeChange::replace(
                        attrs::ATTR_FOREIGN_ID,
                        foreign_id.to_string(),
                    )],
                )
                .await
        }
        n => Err(DirectoryError::DuplicateEntry(format!(
            "{n} entries without a foreign id share nickname '{nickname}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Refresh
// ---------------------------------------------------------------------------

/// Refresh a cached record in place from its stored DN.
///
/// The foreign id is never rewritten; everything else is re-read, the
/// entry re-vetted, and the nickname reconciled against `nickname`.
pub async fn refresh_record<S: DirectorySession>(
    session: &mut S,
    ctx: &SearchContext<'_>,
    record: &mut IdentityRecord,
    nickname: Option<&str>,
) -> Result<(), DirectoryError> {
    debug!(dn = %record.dn, foreign_id = record.foreign_id, "refreshing cached identity");
    let mut entries = session.read_entry(&record.dn, IDENTITY_ATTRS).await?;
    let entry = match entries.len() {
        0 => return Err(DirectoryError::AccountNotFound),
        1 => entries.remove(0),
        n => {
            return Err(DirectoryError::DuplicateEntry(format!(
                "reading '{}' returned {n} entries",
                record.dn
            )))
        }
    };

    vet_entry(&entry, ctx)?;
    let stored = entry.attrs.first(attrs::ATTR_NICKNAME);
    reconcile_nickname(session, &record.dn, stored, nickname).await?;
    *record = materialize_record(&entry, ctx, record.foreign_id, nickname)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Vetting & reconciliation
// ---------------------------------------------------------------------------

/// Reject entries the caller must not see as usable accounts.
///
/// Exclusion wins over the lock marker so that excluded accounts stay
/// indistinguishable from absent ones; the invite-code check runs last.
fn vet_entry(entry: &DirectoryEntry, ctx: &SearchContext<'_>) -> Result<(), DirectoryError> {
    if attrs::member_of_any(&entry.attrs, ctx.excluded_groups) {
        debug!(dn = %entry.dn, "entry is in an excluded group");
        return Err(DirectoryError::AccountNotFound);
    }
    if entry.attrs.has(attrs::ATTR_ACCOUNT_LOCK) {
        debug!(dn = %entry.dn, "entry carries the lock marker");
        return Err(DirectoryError::AccountLocked);
    }
    if let Some(code) = entry.attrs.first(attrs::ATTR_INVITE_CODE) {
        debug!(dn = %entry.dn, "entry still carries an invite code");
        return Err(DirectoryError::AccountNotCompleted {
            invite_code: code.to_string(),
        });
    }
    Ok(())
}

/// Bring the directory's stored nickname in line with the observed one.
///
/// Differing values produce exactly one write; a cleared nickname removes
/// the attribute rather than storing an empty string.
async fn reconcile_nickname<S: DirectorySession>(
    session: &mut S,
    dn: &str,
    stored: Option<&str>,
    observed: Option<&str>,
) -> Result<(), DirectoryError> {
    if stored == observed {
        return Ok(());
    }
    let change = match observed {
        Some(nick) => AttributeChange::replace(attrs::ATTR_NICKNAME, nick),
        None => AttributeChange::delete(attrs::ATTR_NICKNAME),
    };
    debug!(dn, stored, observed, "reconciling stored nickname");
    session.modify_entry(dn, &[change]).await
}

/// Build the cacheable record from a vetted entry.
fn materialize_record(
    entry: &DirectoryEntry,
    ctx: &SearchContext<'_>,
    foreign_id: i64,
    nickname: Option<&str>,
) -> Result<IdentityRecord, DirectoryError> {
    Ok(IdentityRecord {
        dn: entry.dn.clone(),
        foreign_id,
        username: entry.attrs.required(attrs::ATTR_UID, &entry.dn)?,
        common_name: entry.attrs.required(attrs::ATTR_COMMON_NAME, &entry.dn)?,
        given_name: entry.attrs.required(attrs::ATTR_GIVEN_NAME, &entry.dn)?,
        surname: entry.attrs.required(attrs::ATTR_SURNAME, &entry.dn)?,
        safety_test_date: entry.attrs.date(attrs::ATTR_SAFETY_TEST_DATE, &entry.dn),
        signed_safety_form: entry.attrs.flag(attrs::ATTR_SIGNED_SAFETY_FORM),
        is_admin: attrs::member_of_any(&entry.attrs, ctx.admin_groups),
        nickname: nickname.map(str::to_string),
        last_refreshed_at: Utc::now(),
    })
}
