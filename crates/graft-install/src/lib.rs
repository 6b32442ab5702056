//! Graft Install: put a GitHub repository snapshot into a plugin folder.
//!
//! The pipeline runs leaf to root:
//!
//! 1. [`RepositoryReference::parse`] turns `owner/repo`, an HTTPS URL or an
//!    SSH URL into a canonical owner and repository slug.
//! 2. [`ArchiveFetcher`] downloads `{api}/repos/{owner}/{repo}/zipball/{ref}`
//!    through an [`ArchiveTransport`], after a [`CredentialProvider`] has had
//!    a chance to add headers.
//! 3. [`Materializer`] extracts the zip into the install root and works out
//!    which new top-level directory the archive produced.
//! 4. [`Resolver`] applies the collision policy and renames that directory
//!    to `{install_root}/{repo}`.
//! 5. [`MappingStore`] records `{repo} -> owner/repo` so a later update can
//!    fetch the same source.
//!
//! [`Installer`] wires these together behind
//! [`install_plugin`](Installer::install_plugin) and
//! [`update_plugin`](Installer::update_plugin).
//!
//! # Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "http")]
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use graft_install::{ArchiveFetcher, FetchSettings, Installer, ReqwestTransport};
//! use graft_storage::MemoryKvStore;
//!
//! let settings = FetchSettings::new("https://api.github.com".parse()?);
//! let fetcher = ArchiveFetcher::new(settings, Arc::new(ReqwestTransport::new()?));
//! let installer = Installer::new("/srv/plugins", fetcher, Arc::new(MemoryKvStore::new()));
//!
//! let folder = installer.install_plugin("octo/hello-world", None).await?;
//! assert_eq!(folder, "hello-world");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod fetch;
pub mod installer;
pub mod mapping;
pub mod materialize;
pub mod registry;
pub mod resolve;
pub mod source;

pub use error::{
    FetchError, InstallError, InstallResult, MaterializeError, ParseError, ResolveError,
};
#[cfg(feature = "http")]
pub use fetch::ReqwestTransport;
pub use fetch::{
    ArchiveFetcher, ArchiveTransport, CredentialProvider, FetchResult, FetchSettings,
    NoCredentials, RequestOptions, StoredTokenCredentials, TokenCredentials, TransportResponse,
    archive_url,
};
pub use installer::Installer;
pub use mapping::{MappingStore, RepositoryMapping, plugin_slug};
pub use materialize::{ExtractLimits, ExtractionOutcome, Materializer};
pub use registry::{DirectoryRegistry, PluginRegistry, StaticRegistry};
pub use resolve::{InstallRequest, Resolver};
pub use source::{DEFAULT_REF, RepositoryReference, normalize_ref};
