//! Post-merge configuration validation.
//!
//! Runs after paths have been resolved, so an empty `install.root` here
//! means the user explicitly cleared it.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and resolved configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_install(config)?;
    validate_remote(config)?;
    validate_extract(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_install(config: &Config) -> ConfigResult<()> {
    let i = &config.install;

    if i.root.as_os_str().is_empty() {
        return Err(invalid("install.root", "installation root must not be empty"));
    }
    if i.state_dir.as_os_str().is_empty() {
        return Err(invalid("install.state_dir", "state directory must not be empty"));
    }
    if i.manifest_file.is_empty()
        || i.manifest_file.contains(['/', '\\'])
        || i.manifest_file == "."
        || i.manifest_file == ".."
    {
        return Err(invalid(
            "install.manifest_file",
            format!(
                "'{}' must be a plain file name without path separators",
                i.manifest_file
            ),
        ));
    }

    Ok(())
}

fn validate_remote(config: &Config) -> ConfigResult<()> {
    let r = &config.remote;

    let scheme_ok = r.api_base_url.starts_with("https://") || r.api_base_url.starts_with("http://");
    let host = r
        .api_base_url
        .split_once("://")
        .map_or("", |(_, rest)| rest)
        .trim_end_matches('/');
    if !scheme_ok || host.is_empty() {
        return Err(invalid(
            "remote.api_base_url",
            format!(
                "'{}' must be an http:// or https:// URL with a host",
                r.api_base_url
            ),
        ));
    }

    if r.user_agent.trim().is_empty() {
        return Err(invalid("remote.user_agent", "user agent must not be empty"));
    }
    if r.timeout_secs == 0 {
        return Err(invalid("remote.timeout_secs", "timeout must be at least 1 second"));
    }
    if r.max_download_bytes == 0 {
        return Err(invalid(
            "remote.max_download_bytes",
            "download limit must be greater than 0",
        ));
    }
    if r.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(invalid("remote.token", "token must not be blank when set"));
    }

    Ok(())
}

fn validate_extract(config: &Config) -> ConfigResult<()> {
    let e = &config.extract;

    if e.max_entries == 0 {
        return Err(invalid("extract.max_entries", "entry limit must be greater than 0"));
    }
    if e.max_total_bytes == 0 {
        return Err(invalid(
            "extract.max_total_bytes",
            "size limit must be greater than 0",
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
