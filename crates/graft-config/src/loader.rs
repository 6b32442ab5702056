//! Config file discovery and layered loading.
//!
//! Implements the [`load`] algorithm:
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge `{graft_home}/config.toml` (user)
//! 3. Merge the explicit `--config` file, if any
//! 4. Deserialize the merged tree into [`Config`]
//! 5. Apply `GRAFT_*` environment overrides
//! 6. Resolve default and `~`-relative paths
//! 7. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// Environment variable naming the graft home directory.
pub const GRAFT_HOME_ENV: &str = "GRAFT_HOME";

/// A loaded configuration together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged, resolved and validated configuration.
    pub config: Config,
    /// Graft home directory used for default paths.
    pub graft_home: PathBuf,
    /// Config files that contributed, lowest precedence first.
    pub loaded_files: Vec<PathBuf>,
}

/// Load configuration from the process environment.
///
/// The graft home is `$GRAFT_HOME` when set, otherwise `~/.graft`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, the home
/// directory cannot be determined, or the result fails validation.
pub fn load(explicit: Option<&Path>) -> ConfigResult<LoadedConfig> {
    let env_vars = collect_env_vars();
    let graft_home = match env_vars.get(GRAFT_HOME_ENV) {
        Some(home) => PathBuf::from(home),
        None => home_directory()?.join(".graft"),
    };
    load_from(&graft_home, explicit, &env_vars)
}

/// Load configuration rooted at an explicit graft home, with explicit
/// environment variables.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed or the result
/// fails validation.
pub fn load_from(
    graft_home: &Path,
    explicit: Option<&Path>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<LoadedConfig> {
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut loaded_files = Vec::new();

    let user_path = graft_home.join("config.toml");
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge(&mut merged, overlay);
        info!(path = %user_path.display(), "loaded user config");
        loaded_files.push(user_path);
    }

    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge(&mut merged, overlay);
        info!(path = %path.display(), "loaded explicit config");
        loaded_files.push(path.to_path_buf());
    }

    let mut config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    let env_count = apply_env_overrides(&mut config, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment overrides");
    }

    resolve_paths(&mut config, graft_home)?;
    validate::validate(&config)?;

    Ok(LoadedConfig {
        config,
        graft_home: graft_home.to_path_buf(),
        loaded_files,
    })
}

fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, v)| k.starts_with("GRAFT_") && !v.is_empty())
        .collect()
}

/// Apply `GRAFT_*` overrides. Returns how many were applied.
fn apply_env_overrides(config: &mut Config, env_vars: &HashMap<String, String>) -> usize {
    let mut count = 0usize;
    let mut take = |name: &str| {
        let value = env_vars.get(name).filter(|v| !v.is_empty()).cloned();
        if value.is_some() {
            count = count.saturating_add(1);
        }
        value
    };

    if let Some(root) = take("GRAFT_INSTALL_ROOT") {
        config.install.root = PathBuf::from(root);
    }
    if let Some(url) = take("GRAFT_API_BASE_URL") {
        config.remote.api_base_url = url;
    }
    if let Some(token) = take("GRAFT_TOKEN") {
        config.remote.token = Some(token);
    }
    if let Some(level) = take("GRAFT_LOG_LEVEL") {
        config.logging.level = level;
    }

    count
}

/// Fill unset paths from the graft home and expand a leading `~/`.
fn resolve_paths(config: &mut Config, graft_home: &Path) -> ConfigResult<()> {
    if config.install.root.as_os_str().is_empty() {
        config.install.root = graft_home.join("plugins");
    }
    if config.install.state_dir.as_os_str().is_empty() {
        config.install.state_dir = graft_home.to_path_buf();
    }
    config.install.root = expand_home(&config.install.root)?;
    config.install.state_dir = expand_home(&config.install.state_dir)?;
    Ok(())
}

fn expand_home(path: &Path) -> ConfigResult<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_directory()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

/// Recursively merge `overlay` into `base`. Tables merge key by key; any
/// other value in `overlay` replaces the one in `base`.
fn deep_merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key, value);
                    },
                }
            }
        },
        (base, overlay) => *base = overlay,
    }
}

/// Try to load a file, returning `None` if the file doesn't exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}
