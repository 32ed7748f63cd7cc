//! Invite-code linking.
//!
//! Registration hands a person an invite code before their directory
//! account carries a foreign id. [`InviteLinker`] resolves the code to
//! its pending entry and writes the foreign id and current nickname onto
//! it, bridging the gap until the account is completed.

use std::sync::Arc;

use ldap3::ldap_escape;
use tracing::info;

use crate::config::DirectoryConfig;
use crate::directory::attrs::{self, AttributeChange};
use crate::directory::connection::{DirectoryConnector, DirectorySession};
use crate::errors::DirectoryError;

/// Writes chat identifiers onto pending invite entries.
pub struct InviteLinker<C: DirectoryConnector> {
    connector: Arc<C>,
    invites_base: String,
}

impl<C: DirectoryConnector> InviteLinker<C> {
    pub fn new(connector: Arc<C>, directory: &DirectoryConfig) -> Self {
        Self {
            connector,
            invites_base: directory.invites_base.clone(),
        }
    }

    /// Attach `foreign_id` and the current `nickname` to the invite entry
    /// matching `code`. A `None` nickname clears any stored one. The code
    /// itself is left on the entry so a retried registration still finds it.
    pub async fn link_invite(
        &self,
        code: &str,
        foreign_id: i64,
        nickname: Option<&str>,
    ) -> Result<(), DirectoryError> {
        let mut session = self.connector.connect().await?;
        let outcome = self
            .link_with_session(&mut session, code, foreign_id, nickname)
            .await;
        session.close().await;
        outcome
    }

    async fn link_with_session(
        &self,
        session: &mut C::Session,
        code: &str,
        foreign_id: i64,
        nickname: Option<&str>,
    ) -> Result<(), DirectoryError> {
        let filter = format!("({}={})", attrs::ATTR_INVITE_CODE, ldap_escape(code));
        let mut entries = session
            .search_entries(&self.invites_base, &filter, &[])
            .await?;

        let entry = match entries.len() {
            0 => return Err(DirectoryError::AccountNotFound),
            1 => entries.remove(0),
            n => {
                return Err(DirectoryError::DuplicateEntry(format!(
                    "{n} invites share one code"
                )))
            }
        };

        let mut changes = vec![AttributeChange::replace(
            attrs::ATTR_FOREIGN_ID,
            foreign_id.to_string(),
        )];
        match nickname {
            Some(nickname) => {
                changes.push(AttributeChange::replace(attrs::ATTR_NICKNAME, nickname));
            }
            None => changes.push(AttributeChange::delete(attrs::ATTR_NICKNAME)),
        }
        session.modify_entry(&entry.dn, &changes).await?;

        info!(dn = %entry.dn, foreign_id, "invite linked");
        Ok(())
    }
}
