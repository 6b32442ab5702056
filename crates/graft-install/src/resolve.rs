//! Collision policy and the final move into place.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use tracing::{debug, info, warn};

use crate::error::ResolveError;
use crate::materialize::ExtractionOutcome;
use crate::registry::PluginRegistry;
use crate::source::RepositoryReference;

/// One install or update, after parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    /// Repository to install.
    pub reference: RepositoryReference,
    /// Normalized git ref.
    pub git_ref: String,
    /// Replace an existing folder instead of failing.
    pub overwrite: bool,
}

/// Decides whether an extracted archive may take its target folder and
/// moves it there.
#[derive(Debug, Clone)]
pub struct Resolver {
    install_root: PathBuf,
    registry: Arc<dyn PluginRegistry>,
}

impl Resolver {
    /// Create a resolver for `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>, registry: Arc<dyn PluginRegistry>) -> Self {
        Self {
            install_root: install_root.into(),
            registry,
        }
    }

    /// Fail with [`ResolveError::FolderExists`] if `installRoot/{folder}`
    /// exists.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check_prior_folder(&self, folder: &str) -> Result<(), ResolveError> {
        if exists(&self.install_root.join(folder)) {
            return Err(ResolveError::FolderExists {
                folder: folder.to_string(),
            });
        }
        Ok(())
    }

    /// Fail with [`ResolveError::AlreadyRegistered`] if a registered plugin
    /// lives inside `folder`.
    ///
    /// # Errors
    ///
    /// See above.
    pub fn check_registration(&self, folder: &str) -> Result<(), ResolveError> {
        match self.registry.find_in_folder(folder) {
            Some(plugin) => Err(ResolveError::AlreadyRegistered {
                folder: folder.to_string(),
                plugin,
            }),
            None => Ok(()),
        }
    }

    /// Apply the collision policy to `outcome` and move the discovered folder
    /// to `installRoot/{repo}`. Returns the final folder name.
    ///
    /// Runs under an exclusive lock on `installRoot/.{repo}.graft-lock`.
    /// Without `overwrite`, a registered plugin or an existing folder at the
    /// target rejects the install and the extracted folder is removed. With
    /// `overwrite`, the existing folder is set aside and restored if the
    /// move fails.
    ///
    /// # Errors
    ///
    /// [`ResolveError::LockFailed`], [`ResolveError::AlreadyRegistered`],
    /// [`ResolveError::FolderExists`] or [`ResolveError::MoveFailed`].
    pub fn resolve(
        &self,
        outcome: &ExtractionOutcome,
        request: &InstallRequest,
    ) -> Result<String, ResolveError> {
        let folder = request.reference.repo();
        let extracted = self.install_root.join(&outcome.discovered_folder);
        let target = self.install_root.join(folder);

        let _lock = match self.lock(folder) {
            Ok(lock) => lock,
            Err(e) => {
                self.discard(&extracted);
                return Err(e);
            },
        };

        if !request.overwrite
            && let Err(e) = self
                .check_registration(folder)
                .and_then(|()| check_conflict(&extracted, &target, folder))
        {
            self.discard(&extracted);
            return Err(e);
        }

        if extracted == target {
            info!(folder, "archive already extracted under its final name");
            return Ok(folder.to_string());
        }

        let backup = if exists(&target) {
            let backup = self.install_root.join(format!(".{folder}.graft-backup"));
            if exists(&backup)
                && let Err(e) = remove_path(&backup)
            {
                self.discard(&extracted);
                return Err(move_failed(&target, &backup, e));
            }
            if let Err(e) = std::fs::rename(&target, &backup) {
                self.discard(&extracted);
                return Err(move_failed(&target, &backup, e));
            }
            debug!(from = %target.display(), to = %backup.display(), "set aside previous install");
            Some(backup)
        } else {
            None
        };

        if let Err(e) = std::fs::rename(&extracted, &target) {
            if let Some(backup) = &backup
                && let Err(restore) = std::fs::rename(backup, &target)
            {
                warn!(
                    backup = %backup.display(),
                    error = %restore,
                    "failed to restore previous install"
                );
            }
            self.discard(&extracted);
            return Err(move_failed(&extracted, &target, e));
        }

        if let Some(backup) = backup
            && let Err(e) = remove_path(&backup)
        {
            warn!(path = %backup.display(), error = %e, "failed to remove previous install");
        }

        info!(folder, from = %outcome.discovered_folder, "plugin folder committed");
        Ok(folder.to_string())
    }

    fn lock(&self, folder: &str) -> Result<File, ResolveError> {
        let path = self.install_root.join(format!(".{folder}.graft-lock"));
        let lock_failed = |source| ResolveError::LockFailed {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .read(true)
            .open(&path)
            .map_err(lock_failed)?;
        file.lock_exclusive().map_err(lock_failed)?;
        Ok(file)
    }

    /// Best-effort removal of an extracted folder that will not be used.
    fn discard(&self, extracted: &Path) {
        if !extracted.starts_with(&self.install_root) || !exists(extracted) {
            return;
        }
        if let Err(e) = remove_path(extracted) {
            warn!(path = %extracted.display(), error = %e, "failed to remove extracted folder");
        }
    }
}

fn check_conflict(extracted: &Path, target: &Path, folder: &str) -> Result<(), ResolveError> {
    if extracted != target && exists(target) {
        return Err(ResolveError::FolderExists {
            folder: folder.to_string(),
        });
    }
    Ok(())
}

fn move_failed(from: &Path, to: &Path, source: io::Error) -> ResolveError {
    ResolveError::MoveFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

/// Exists without following a final symlink.
fn exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

fn remove_path(path: &Path) -> io::Result<()> {
    if path.symlink_metadata()?.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}
