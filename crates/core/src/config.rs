//! TOML-based configuration system for ChatDirSync.
//!
//! Sensitive values (the directory bind password) are stored as `_env`
//! fields that reference environment variable names. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory server connection and layout settings.
    pub directory: DirectoryConfig,

    /// Cache TTL settings.
    #[serde(default)]
    pub cache: CacheConfig,
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// Directory server connection and tree layout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Directory server URL (`ldap://...` or `ldaps://...`). Plain `ldap`
    /// URLs are upgraded with STARTTLS at connect time.
    pub url: String,

    /// DN used for the simple bind.
    pub bind_dn: String,

    /// Environment variable holding the bind password.
    pub bind_password_env: String,

    /// Subtree holding person entries.
    pub people_base: String,

    /// Subtree holding pending invite entries.
    pub invites_base: String,

    /// Groups whose members are administrators.
    #[serde(default)]
    pub admin_groups: Vec<String>,

    /// Groups whose members must appear not to exist.
    #[serde(default)]
    pub excluded_groups: Vec<String>,

    /// Connection timeout in seconds (default 30).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Resolved bind password (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub bind_password: Option<String>,
}

fn default_connect_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

/// TTL settings for the identity and directory-snapshot caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Seconds a cached identity record stays fresh (default 3600).
    #[serde(default = "default_ttl")]
    pub identity_ttl_secs: u64,

    /// Seconds the directory-wide snapshot stays fresh (default 3600).
    #[serde(default = "default_ttl")]
    pub directory_ttl_secs: u64,
}

fn default_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            identity_ttl_secs: default_ttl(),
            directory_ttl_secs: default_ttl(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file at the given path.
    ///
    /// This does **not** resolve environment variables -- call
    /// [`resolve_env_vars`](Self::resolve_env_vars) afterwards.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables and populate
    /// the corresponding resolved fields.
    ///
    /// Fields that reference a missing variable will log a warning but will
    /// **not** fail -- callers can check the `Option` fields and decide what
    /// is required for their execution mode.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        info!("resolving environment variable references in config");

        self.directory.bind_password = resolve_optional_env(
            &self.directory.bind_password_env,
            "directory.bind_password_env",
        );

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "directory.url".into(),
                detail: "directory URL must not be empty".into(),
            });
        }
        if !self.directory.url.starts_with("ldap://") && !self.directory.url.starts_with("ldaps://")
        {
            return Err(ConfigError::InvalidValue {
                field: "directory.url".into(),
                detail: "directory URL must start with ldap:// or ldaps://".into(),
            });
        }
        if self.directory.bind_dn.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "directory.bind_dn".into(),
                detail: "bind DN must not be empty".into(),
            });
        }
        if self.directory.people_base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "directory.people_base".into(),
                detail: "people base DN must not be empty".into(),
            });
        }
        if self.directory.invites_base.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "directory.invites_base".into(),
                detail: "invites base DN must not be empty".into(),
            });
        }
        if self.directory.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "directory.connect_timeout_secs".into(),
                detail: "connection timeout must be > 0".into(),
            });
        }
        if self.cache.identity_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.identity_ttl_secs".into(),
                detail: "identity TTL must be > 0".into(),
            });
        }
        if self.cache.directory_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.directory_ttl_secs".into(),
                detail: "directory TTL must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
