//! Configuration types for graft.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header produces a working
//! configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where plugins are installed and where state is kept.
    pub install: InstallSection,
    /// Remote archive host settings.
    pub remote: RemoteSection,
    /// Archive extraction limits.
    pub extract: ExtractSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

/// `[install]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstallSection {
    /// Installation root. Empty means `{graft_home}/plugins`.
    pub root: PathBuf,
    /// Directory holding the state file. Empty means `{graft_home}`.
    pub state_dir: PathBuf,
    /// File name whose presence marks a directory as a registered plugin.
    pub manifest_file: String,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            state_dir: PathBuf::new(),
            manifest_file: "plugin.toml".to_owned(),
        }
    }
}

/// `[remote]` section.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Base URL of the repository host API.
    pub api_base_url: String,
    /// Client identifier sent as `User-Agent`.
    pub user_agent: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Largest archive body accepted, in bytes.
    pub max_download_bytes: u64,
    /// Access token for private repositories. Never written back out.
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_owned(),
            user_agent: "graft-plugin-installer".to_owned(),
            timeout_secs: 60,
            max_download_bytes: 104_857_600,
            token: None,
        }
    }
}

impl std::fmt::Debug for RemoteSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSection")
            .field("api_base_url", &self.api_base_url)
            .field("user_agent", &self.user_agent)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_download_bytes", &self.max_download_bytes)
            .field("has_token", &self.token.is_some())
            .finish()
    }
}

/// `[extract]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractSection {
    /// Maximum number of entries in one archive.
    pub max_entries: usize,
    /// Maximum total uncompressed size, in bytes.
    pub max_total_bytes: u64,
}

impl Default for ExtractSection {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_bytes: 500_000_000,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Base level: trace, debug, info, warn or error.
    pub level: String,
    /// Output format: pretty, compact, json or full.
    pub format: String,
    /// Per-target overrides (e.g. `graft_install=debug`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
