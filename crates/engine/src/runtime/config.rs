//! Runtime configuration via `tandem.toml`
//!
//! A default `tandem.toml` can be written next to the application on first
//! start; edit it and restart to change settings. Every field is optional
//! in the file and falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tandem_core::{Error, Result};
use tandem_search::RefreshPolicy;

/// Config file name looked up by applications
pub const CONFIG_FILE_NAME: &str = "tandem.toml";

/// Search flush settings, the `[search]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Wait for the index refresh before a flush returns
    #[serde(default)]
    pub wait_for_refresh: bool,
}

impl SearchConfig {
    /// Refresh policy passed to the search store on every flush
    pub fn refresh_policy(&self) -> RefreshPolicy {
        RefreshPolicy::from_wait(self.wait_for_refresh)
    }
}

/// Runtime configuration loaded from `tandem.toml`.
///
/// # Example
///
/// ```toml
/// # Timeout for independent transactions in milliseconds (0 = none)
/// default_timeout_ms = 30000
///
/// [search]
/// wait_for_refresh = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TandemConfig {
    /// Default timeout of `begin_new_transaction` scopes, 0 for none
    #[serde(default)]
    pub default_timeout_ms: u64,
    /// Search flush settings
    #[serde(default)]
    pub search: SearchConfig,
}

impl TandemConfig {
    /// Default timeout as a duration, `None` when disabled
    pub fn default_timeout(&self) -> Option<Duration> {
        (self.default_timeout_ms > 0).then(|| Duration::from_millis(self.default_timeout_ms))
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tandem configuration
#
# Default timeout in milliseconds for independent transactions
# (begin_new_transaction without an explicit timeout). 0 = no timeout.
default_timeout_ms = 0

[search]
# Wait for the search index refresh before a flush returns (default: false)
# Slower commits, but searches see the changes as soon as dispose returns.
wait_for_refresh = false
"#
    }

    /// Parse config from TOML text
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the text is not valid TOML for this schema.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, `InvalidConfig` if it
    /// cannot be parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
