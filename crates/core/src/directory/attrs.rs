//! Attribute schema and access helpers for directory entries.
//!
//! Directory servers are case-insensitive about attribute names and make no
//! promise about the casing they return, so [`AttributeMap`] normalizes
//! names to lowercase when a search result is ingested and again on lookup.

use std::collections::HashMap;

use chrono::NaiveDate;
use tracing::warn;

use crate::errors::DirectoryError;

// ---------------------------------------------------------------------------
// Schema constants
// ---------------------------------------------------------------------------

/// Object class carried by person entries.
pub const PERSON_OBJECT_CLASS: &str = "labMember";

// Standard attributes.
pub const ATTR_UID: &str = "uid";
pub const ATTR_COMMON_NAME: &str = "cn";
pub const ATTR_GIVEN_NAME: &str = "givenName";
pub const ATTR_SURNAME: &str = "sn";
pub const ATTR_MEMBER_OF: &str = "memberOf";
pub const ATTR_DATE_OF_BIRTH: &str = "schacDateOfBirth";
pub const ATTR_ACCOUNT_LOCK: &str = "nsAccountLock";

// Deployment attributes.
pub const ATTR_FOREIGN_ID: &str = "chatId";
pub const ATTR_NICKNAME: &str = "chatNickname";
pub const ATTR_INVITE_CODE: &str = "inviteCode";
pub const ATTR_SAFETY_TEST_DATE: &str = "safetyTestDate";
pub const ATTR_HAS_KEY: &str = "hasKey";
pub const ATTR_SIGNED_SAFETY_FORM: &str = "signedSafetyForm";

// ---------------------------------------------------------------------------
// Attribute changes
// ---------------------------------------------------------------------------

/// A single attribute modification to apply to an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeChange {
    /// Replace all values of `name` with the single `value`.
    Replace { name: String, value: String },
    /// Remove every value of `name`.
    Delete { name: String },
}

impl AttributeChange {
    /// Replace all values of `name` with a single `value`.
    pub fn replace(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Replace {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Remove the attribute entirely.
    pub fn delete(name: impl Into<String>) -> Self {
        Self::Delete { name: name.into() }
    }
}

// ---------------------------------------------------------------------------
// Attribute map
// ---------------------------------------------------------------------------

/// Case-insensitive view over one entry's attributes.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap {
    values: HashMap<String, Vec<String>>,
}

impl AttributeMap {
    /// Build from the raw attribute map of a search entry.
    pub fn from_search_attrs(attrs: HashMap<String, Vec<String>>) -> Self {
        let values = attrs
            .into_iter()
            .map(|(name, vals)| (name.to_lowercase(), vals))
            .collect();
        Self { values }
    }

    /// First value of `name`, if the attribute is present with at least one
    /// value.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_lowercase())
            .and_then(|vals| vals.first())
            .map(String::as_str)
    }

    /// First value of `name`, or a protocol error naming the entry.
    pub fn required(&self, name: &str, dn: &str) -> Result<String, DirectoryError> {
        self.first(name).map(str::to_string).ok_or_else(|| {
            DirectoryError::Protocol(format!("entry '{dn}' is missing attribute '{name}'"))
        })
    }

    /// Whether the attribute is present with at least one value.
    pub fn has(&self, name: &str) -> bool {
        self.first(name).is_some()
    }

    /// All values of `name` (empty when absent).
    pub fn values(&self, name: &str) -> &[String] {
        self.values
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Boolean flag semantics: present and literally `"true"`.
    pub fn flag(&self, name: &str) -> bool {
        self.first(name) == Some("true")
    }

    /// SCHAC-format date attribute (`YYYYMMDD`, optionally followed by a
    /// time part). Malformed values are logged and treated as absent.
    pub fn date(&self, name: &str, dn: &str) -> Option<NaiveDate> {
        let raw = self.first(name)?;
        match parse_schac_date(raw) {
            Some(date) => Some(date),
            None => {
                warn!(attribute = name, value = raw, dn, "unparseable date attribute");
                None
            }
        }
    }
}

/// Parse the date part of a SCHAC timestamp: the first eight characters as
/// `YYYYMMDD`.
pub fn parse_schac_date(raw: &str) -> Option<NaiveDate> {
    let digits = raw.get(..8)?;
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// Whether any of the entry's `memberOf` values names one of `groups`.
/// DN comparison is case-insensitive.
pub fn member_of_any(attrs: &AttributeMap, groups: &[String]) -> bool {
    if groups.is_empty() {
        return false;
    }
    attrs
        .values(ATTR_MEMBER_OF)
        .iter()
        .any(|dn| groups.iter().any(|group| group.eq_ignore_ascii_case(dn)))
}
