//! Bridge from `graft_config::Config` to the library types the commands use.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use graft_config::Config;
use graft_install::{
    ArchiveFetcher, CredentialProvider, DirectoryRegistry, ExtractLimits, FetchSettings,
    Installer, ReqwestTransport, StoredTokenCredentials, TokenCredentials,
};
use graft_storage::{FileKvStore, KvStore};
use graft_telemetry::{LogConfig, LogFormat};
use url::Url;

/// Logging settings from the `[logging]` section.
///
/// An unknown format falls back to compact output; validation has already
/// rejected it for loaded configs.
pub(crate) fn to_log_config(config: &Config) -> LogConfig {
    let format = config
        .logging
        .format
        .parse::<LogFormat>()
        .unwrap_or_default();
    config
        .logging
        .directives
        .iter()
        .fold(
            LogConfig::new(config.logging.level.clone()).with_format(format),
            |log, directive| log.with_directive(directive.clone()),
        )
}

/// The state store under `[install] state_dir`.
pub(crate) fn open_store(config: &Config) -> Arc<dyn KvStore> {
    Arc::new(FileKvStore::in_dir(&config.install.state_dir))
}

/// Fetch settings from the `[remote]` section.
pub(crate) fn to_fetch_settings(config: &Config) -> anyhow::Result<FetchSettings> {
    let api_base_url = Url::parse(&config.remote.api_base_url)
        .with_context(|| format!("invalid api_base_url '{}'", config.remote.api_base_url))?;
    Ok(FetchSettings {
        api_base_url,
        user_agent: config.remote.user_agent.clone(),
        timeout: Duration::from_secs(config.remote.timeout_secs),
        max_download_bytes: config.remote.max_download_bytes,
    })
}

/// A configured token wins; otherwise the token saved with `graft token set`
/// is read from the store on each request.
pub(crate) fn credentials(config: &Config, store: &Arc<dyn KvStore>) -> Arc<dyn CredentialProvider> {
    match config.remote.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Arc::new(TokenCredentials::new(token)),
        _ => Arc::new(StoredTokenCredentials::new(Arc::clone(store))),
    }
}

/// Build the installer the `install` and `update` commands run.
pub(crate) fn build_installer(config: &Config) -> anyhow::Result<Installer> {
    let store = open_store(config);
    let transport = ReqwestTransport::new().context("failed to create HTTP transport")?;
    let fetcher = ArchiveFetcher::new(to_fetch_settings(config)?, Arc::new(transport))
        .with_credentials(credentials(config, &store));

    let registry = DirectoryRegistry::new(&config.install.root, &config.install.manifest_file);

    Ok(Installer::new(&config.install.root, fetcher, store)
        .with_registry(Arc::new(registry))
        .with_extract_limits(ExtractLimits {
            max_entries: config.extract.max_entries,
            max_total_bytes: config.extract.max_total_bytes,
        }))
}

#[cfg(test)]
mod tests {
    use graft_storage::MemoryKvStore;

    use super::*;

    #[test]
    fn log_config_carries_level_format_and_directives() {
        let mut config = Config::default();
        config.logging.level = "debug".to_owned();
        config.logging.format = "json".to_owned();
        config.logging.directives = vec!["graft_install=trace".to_owned()];

        let log = to_log_config(&config);
        assert_eq!(log.level, "debug");
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["graft_install=trace".to_owned()]);
    }

    #[test]
    fn fetch_settings_follow_remote_section() {
        let mut config = Config::default();
        config.remote.timeout_secs = 5;
        config.remote.user_agent = "custom-agent".to_owned();

        let settings = to_fetch_settings(&config).unwrap();
        assert_eq!(settings.api_base_url.as_str(), "https://api.github.com/");
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.user_agent, "custom-agent");
    }

    #[test]
    fn configured_token_takes_precedence() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let mut config = Config::default();

        let stored = format!("{:?}", credentials(&config, &store));
        assert!(stored.starts_with("StoredTokenCredentials"));

        config.remote.token = Some("abc".to_owned());
        let configured = format!("{:?}", credentials(&config, &store));
        assert!(configured.starts_with("TokenCredentials"));
        assert!(!configured.contains("abc"));
    }
}
