//! The `install_plugin` / `update_plugin` entry points.

use std::path::Path;
use std::sync::Arc;

use graft_storage::KvStore;
use tracing::{info, warn};

use crate::error::{InstallError, InstallResult};
use crate::fetch::ArchiveFetcher;
use crate::mapping::MappingStore;
use crate::materialize::{ExtractLimits, Materializer};
use crate::registry::{PluginRegistry, StaticRegistry};
use crate::resolve::{InstallRequest, Resolver};
use crate::source::{RepositoryReference, is_slug, normalize_ref};

/// Runs the fetch, extract, resolve and record pipeline.
///
/// Fetching is async; the filesystem steps run synchronously inside the
/// calling task.
#[derive(Debug, Clone)]
pub struct Installer {
    fetcher: ArchiveFetcher,
    materializer: Materializer,
    resolver: Resolver,
    mappings: MappingStore,
}

impl Installer {
    /// Create an installer writing under `install_root` and recording
    /// mappings in `store`. No plugins are considered registered until
    /// [`with_registry`](Self::with_registry) is called.
    #[must_use]
    pub fn new(
        install_root: impl AsRef<Path>,
        fetcher: ArchiveFetcher,
        store: Arc<dyn KvStore>,
    ) -> Self {
        let install_root = install_root.as_ref();
        Self {
            fetcher,
            materializer: Materializer::new(install_root),
            resolver: Resolver::new(install_root, Arc::new(StaticRegistry::default())),
            mappings: MappingStore::new(store),
        }
    }

    /// Consult `registry` before installing without overwrite.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<dyn PluginRegistry>) -> Self {
        self.resolver = Resolver::new(self.materializer.install_root(), registry);
        self
    }

    /// Replace the archive extraction limits.
    #[must_use]
    pub fn with_extract_limits(mut self, limits: ExtractLimits) -> Self {
        self.materializer = self.materializer.with_limits(limits);
        self
    }

    /// Directory plugins are installed into.
    #[must_use]
    pub fn install_root(&self) -> &Path {
        self.materializer.install_root()
    }

    /// Folder to repository mappings.
    #[must_use]
    pub fn mappings(&self) -> &MappingStore {
        &self.mappings
    }

    /// Install the repository named by `raw` (`owner/repo`, an HTTPS URL or
    /// an SSH URL) at `git_ref` (default `HEAD`). Returns the folder name
    /// under the install root.
    ///
    /// An existing folder or registered plugin with the same name rejects
    /// the install before anything is downloaded.
    ///
    /// # Errors
    ///
    /// Any [`InstallError`]; the install root is left as it was.
    pub async fn install_plugin(&self, raw: &str, git_ref: Option<&str>) -> InstallResult<String> {
        let request = InstallRequest {
            reference: RepositoryReference::parse(raw)?,
            git_ref: normalize_ref(git_ref)?,
            overwrite: false,
        };

        let folder = request.reference.repo();
        self.resolver.check_registration(folder)?;
        self.resolver.check_prior_folder(folder)?;

        self.run(&request).await
    }

    /// Re-fetch the repository recorded for `folder` at `git_ref` (default
    /// `HEAD`) and replace the folder with it.
    ///
    /// # Errors
    ///
    /// [`InstallError::InvalidFolderName`] or [`InstallError::NoMapping`]
    /// before any network access, otherwise any pipeline failure. A failed
    /// update leaves the previous folder in place.
    pub async fn update_plugin(&self, folder: &str, git_ref: Option<&str>) -> InstallResult<String> {
        let folder = folder.trim();
        if !is_slug(folder) {
            return Err(InstallError::InvalidFolderName {
                folder: folder.to_string(),
            });
        }

        let mapping = self
            .mappings
            .get(folder)?
            .ok_or_else(|| InstallError::NoMapping {
                folder: folder.to_string(),
            })?;

        let request = InstallRequest {
            reference: mapping.reference()?,
            git_ref: normalize_ref(git_ref)?,
            overwrite: true,
        };

        if request.reference.repo() != folder {
            warn!(
                folder,
                repository = %request.reference,
                "mapped repository installs under a different folder name"
            );
        }

        self.run(&request).await
    }

    async fn run(&self, request: &InstallRequest) -> InstallResult<String> {
        info!(
            repository = %request.reference,
            git_ref = %request.git_ref,
            overwrite = request.overwrite,
            "install started"
        );

        let fetched = self
            .fetcher
            .fetch(&request.reference, &request.git_ref)
            .await?;

        let outcome = self
            .materializer
            .materialize(&fetched.bytes, &request.reference)?;
        drop(fetched);

        let folder = self.resolver.resolve(&outcome, request)?;
        self.mappings.put(&folder, &request.reference)?;

        info!(
            folder = %folder,
            repository = %request.reference,
            git_ref = %request.git_ref,
            overwrite = request.overwrite,
            "plugin installed"
        );
        Ok(folder)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use graft_storage::MemoryKvStore;
    use url::Url;

    use super::*;
    use crate::error::FetchError;
    use crate::fetch::{ArchiveTransport, FetchSettings, RequestOptions, TransportResponse};

    #[derive(Debug, Default)]
    struct Counting {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl ArchiveTransport for Counting {
        async fn get(
            &self,
            _url: &Url,
            _options: &RequestOptions,
            _max_bytes: u64,
        ) -> Result<TransportResponse, FetchError> {
            let mut calls = self.calls.lock().unwrap();
            *calls = calls.saturating_add(1);
            Ok(TransportResponse {
                status: 404,
                body: Vec::new(),
            })
        }
    }

    fn installer(root: &Path, transport: Arc<Counting>) -> Installer {
        let settings = FetchSettings::new(Url::parse("https://api.example.test").unwrap());
        let fetcher = ArchiveFetcher::new(settings, transport);
        Installer::new(root, fetcher, Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn invalid_input_never_fetches() {
        let root = tempfile::tempdir().unwrap();
        let transport = Arc::new(Counting::default());
        let installer = installer(root.path(), Arc::clone(&transport));

        let err = installer.install_plugin("   ", None).await.unwrap_err();
        assert_eq!(err.kind(), "empty_input");
        let err = installer
            .install_plugin("octo/hello", Some("bad\nref"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_ref");

        assert_eq!(*transport.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn registered_plugin_is_rejected_before_fetch() {
        let root = tempfile::tempdir().unwrap();
        let transport = Arc::new(Counting::default());
        let installer = installer(root.path(), Arc::clone(&transport))
            .with_registry(Arc::new(StaticRegistry::new(["hello/plugin.toml"])));

        let err = installer.install_plugin("octo/hello", None).await.unwrap_err();

        assert_eq!(err.kind(), "already_registered");
        assert_eq!(*transport.calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn update_rejects_bad_folder_names() {
        let root = tempfile::tempdir().unwrap();
        let transport = Arc::new(Counting::default());
        let installer = installer(root.path(), Arc::clone(&transport));

        for folder in ["", "../etc", "Hello", "a/b"] {
            let err = installer.update_plugin(folder, None).await.unwrap_err();
            assert_eq!(err.kind(), "invalid_folder_name", "{folder}");
        }
        assert_eq!(*transport.calls.lock().unwrap(), 0);
    }
}
