//! Error types for the ChatDirSync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them for callers that want a single
//! error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Directory errors
// ---------------------------------------------------------------------------

/// Errors from directory lookups, reconciliation writes, and cache refresh.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// No matching, reachable entry exists. Entries in excluded groups
    /// report this too, so that excluded accounts stay indistinguishable
    /// from absent ones.
    #[error("account not found")]
    AccountNotFound,

    /// The entry exists but carries the account lock marker.
    #[error("account is locked")]
    AccountLocked,

    /// The entry exists but registration was never finished; carries the
    /// outstanding invite code so callers can point the person back at the
    /// signup flow.
    #[error("account registration not completed (invite code '{invite_code}')")]
    AccountNotCompleted {
        invite_code: String,
    },

    /// A query that must match at most one entry matched several. The
    /// payload names the query so an operator can find the offending
    /// entries.
    #[error("duplicate directory entries: {0}")]
    DuplicateEntry(String),

    /// The directory server could not be reached or bound to.
    #[error("directory connection error: {0}")]
    Connection(String),

    /// The directory answered with an unexpected result code or a
    /// structurally invalid entry.
    #[error("directory protocol error: {0}")]
    Protocol(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing {
        var: String,
        field: String,
    },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue {
        field: String,
        detail: String,
    },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
