//! Directory connection capability and its `ldap3` implementation.
//!
//! The caches talk to the directory through the [`DirectoryConnector`] /
//! [`DirectorySession`] trait pair. Sessions are scoped to one logical
//! operation: acquire, run the searches and writes, then [`close`]. The
//! production implementation wraps the `ldap3` crate; tests substitute an
//! in-memory mock.
//!
//! [`close`]: DirectorySession::close

use std::collections::HashSet;
use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry};
use tracing::debug;

use crate::config::DirectoryConfig;
use crate::directory::attrs::{AttributeChange, AttributeMap};
use crate::errors::DirectoryError;

/// Result code returned for searches below a DN that does not exist.
const RC_NO_SUCH_OBJECT: u32 = 32;

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// One entry returned by a directory search: its DN plus attributes.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: AttributeMap,
}

/// Acquires bound directory sessions.
pub trait DirectoryConnector: Send + Sync {
    type Session: DirectorySession;

    /// Open the transport and bind. The returned session is scoped to one
    /// logical operation and must be closed by the caller on every exit
    /// path.
    async fn connect(&self) -> Result<Self::Session, DirectoryError>;
}

/// A bound directory session.
pub trait DirectorySession: Send {
    /// Subtree search under `base`. An empty `attrs` slice requests all
    /// user attributes.
    async fn search_entries(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Base-scoped read of a single DN. Zero or one results are expected;
    /// callers treat more than one as directory corruption. A missing DN
    /// yields an empty result set, not an error.
    async fn read_entry(
        &mut self,
        dn: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Apply attribute changes to the entry at `dn`.
    async fn modify_entry(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), DirectoryError>;

    /// Release the session. Errors during release are logged, not raised.
    async fn close(self);
}

// ---------------------------------------------------------------------------
// ldap3 implementation
// ---------------------------------------------------------------------------

/// Production connector backed by the `ldap3` crate.
///
/// `connect` opens the transport (negotiating STARTTLS unless the URL is
/// already `ldaps://`), performs a simple bind, and hands back a session.
pub struct LdapConnector {
    url: String,
    bind_dn: String,
    bind_password: String,
    connect_timeout: Duration,
}

impl LdapConnector {
    /// Create a connector from the directory configuration. Requires the
    /// bind password to have been resolved from the environment already.
    pub fn new(config: &DirectoryConfig) -> Self {
        Self {
            url: config.url.clone(),
            bind_dn: config.bind_dn.clone(),
            bind_password: config.bind_password.clone().unwrap_or_default(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        }
    }
}

impl DirectoryConnector for LdapConnector {
    type Session = LdapSession;

    async fn connect(&self) -> Result<LdapSession, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.connect_timeout)
            .set_starttls(use_starttls(&self.url));
        debug!(url = %self.url, "connecting to directory");

        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;
        ldap3::drive!(conn);

        ldap.simple_bind(&self.bind_dn, &self.bind_password)
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?
            .success()
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;

        debug!(bind_dn = %self.bind_dn, "directory bind succeeded");
        Ok(LdapSession { ldap })
    }
}

/// Plain `ldap://` URLs are upgraded in-band; `ldaps://` already carries TLS.
fn use_starttls(url: &str) -> bool {
    !url.starts_with("ldaps://")
}

/// A bound `ldap3` session.
pub struct LdapSession {
    ldap: Ldap,
}

impl LdapSession {
    async fn search_scoped(
        &mut self,
        base: &str,
        scope: Scope,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let result = self
            .ldap
            .search(base, scope, filter, attrs.to_vec())
            .await
            .map_err(operation_error)?;

        let entries = match result.success() {
            Ok((entries, _)) => entries,
            Err(LdapError::LdapResult { ref result }) if result.rc == RC_NO_SUCH_OBJECT => {
                Vec::new()
            }
            Err(e) => return Err(operation_error(e)),
        };

        Ok(entries
            .into_iter()
            .map(|entry| {
                let entry = SearchEntry::construct(entry);
                DirectoryEntry {
                    dn: entry.dn,
                    attrs: AttributeMap::from_search_attrs(entry.attrs),
                }
            })
            .collect())
    }
}

impl DirectorySession for LdapSession {
    async fn search_entries(
        &mut self,
        base: &str,
        filter: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.search_scoped(base, Scope::Subtree, filter, attrs).await
    }

    async fn read_entry(
        &mut self,
        dn: &str,
        attrs: &[&str],
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.search_scoped(dn, Scope::Base, "(objectClass=*)", attrs)
            .await
    }

    async fn modify_entry(
        &mut self,
        dn: &str,
        changes: &[AttributeChange],
    ) -> Result<(), DirectoryError> {
        self.ldap
            .modify(dn, to_mods(changes))
            .await
            .map_err(operation_error)?
            .success()
            .map_err(operation_error)?;
        Ok(())
    }

    async fn close(mut self) {
        if let Err(e) = self.ldap.unbind().await {
            debug!(error = %e, "directory unbind failed");
        }
    }
}

fn to_mods(changes: &[AttributeChange]) -> Vec<Mod<String>> {
    changes
        .iter()
        .map(|change| match change {
            AttributeChange::Replace { name, value } => {
                Mod::Replace(name.clone(), HashSet::from([value.clone()]))
            }
            AttributeChange::Delete { name } => Mod::Delete(name.clone(), HashSet::new()),
        })
        .collect()
}

/// Transport failures surface as [`DirectoryError::Connection`]; LDAP
/// result codes surface as [`DirectoryError::Protocol`].
fn operation_error(err: LdapError) -> DirectoryError {
    match err {
        LdapError::LdapResult { .. } => DirectoryError::Protocol(err.to_string()),
        _ => DirectoryError::Connection(err.to_string()),
    }
}
