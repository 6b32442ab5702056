//! Archive extraction into the install root.
//!
//! The archive is written to a temporary file, extracted in place, and the
//! temporary file is removed whatever the outcome. The folder the archive
//! produced is found by diffing the install root's directory listing.
//!
//! Extraction only writes into top-level folders it created itself: a name
//! that already exists in the install root, including hidden entries and
//! symlinks, rejects the archive.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::MaterializeError;
use crate::source::RepositoryReference;

/// Limits applied while extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractLimits {
    /// Maximum number of archive entries.
    pub max_entries: usize,
    /// Maximum total uncompressed size, in bytes.
    pub max_total_bytes: u64,
}

impl Default for ExtractLimits {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_total_bytes: 500_000_000,
        }
    }
}

/// What an extraction left in the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionOutcome {
    /// Folder chosen as the archive's output.
    pub discovered_folder: String,
    /// Every top-level directory that appeared during extraction.
    pub created_directories: BTreeSet<String>,
}

/// Writes and extracts archives under one install root.
#[derive(Debug, Clone)]
pub struct Materializer {
    install_root: PathBuf,
    limits: ExtractLimits,
}

impl Materializer {
    /// Create a materializer for `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>) -> Self {
        Self {
            install_root: install_root.into(),
            limits: ExtractLimits::default(),
        }
    }

    /// Override the extraction limits.
    #[must_use]
    pub fn with_limits(mut self, limits: ExtractLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Install root this materializer writes into.
    #[must_use]
    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Persist `bytes`, extract them into the install root, and report the
    /// folder they produced.
    ///
    /// # Errors
    ///
    /// - [`MaterializeError::TmpCreate`] / [`MaterializeError::Persist`] if
    ///   the temporary archive cannot be written.
    /// - [`MaterializeError::Extract`] if the archive is corrupt or unsafe;
    ///   top-level folders it had already created are removed.
    /// - [`MaterializeError::FolderNotFound`] if nothing new appeared; any
    ///   folders it did create are removed.
    pub fn materialize(
        &self,
        bytes: &[u8],
        reference: &RepositoryReference,
    ) -> Result<ExtractionOutcome, MaterializeError> {
        let tmp = write_temp_archive(bytes, reference.repo())?;

        std::fs::create_dir_all(&self.install_root).map_err(|e| {
            MaterializeError::extract_with(
                format!("failed to create install root {}", self.install_root.display()),
                e,
            )
        })?;
        let before = list_directories(&self.install_root).map_err(|e| {
            MaterializeError::extract_with("failed to list install root before extraction", e)
        })?;

        let mut claimed = BTreeSet::new();
        let extracted = self.extract(tmp.path(), &mut claimed);

        let tmp_path = tmp.path().to_path_buf();
        if let Err(e) = tmp.close() {
            warn!(path = %tmp_path.display(), error = %e, "failed to remove temporary archive");
        }

        if let Err(e) = extracted {
            self.remove_created(&claimed);
            return Err(e);
        }

        let after = match list_directories(&self.install_root) {
            Ok(after) => after,
            Err(e) => {
                self.remove_created(&claimed);
                return Err(MaterializeError::extract_with(
                    "failed to list install root after extraction",
                    e,
                ));
            },
        };
        let created = created_directories(&before, &after);
        let Some(discovered) = discover_folder(&created, reference.owner(), reference.repo())
        else {
            self.remove_created(&claimed);
            return Err(MaterializeError::FolderNotFound);
        };

        info!(
            folder = %discovered,
            created = created.len(),
            "archive extracted"
        );
        Ok(ExtractionOutcome {
            discovered_folder: discovered,
            created_directories: created,
        })
    }

    /// Extract every entry, recording in `claimed` each top-level folder this
    /// archive created so a failure can remove exactly those.
    fn extract(&self, archive_path: &Path, claimed: &mut BTreeSet<String>) -> Result<(), MaterializeError> {
        let file = File::open(archive_path)
            .map_err(|e| MaterializeError::extract_with("failed to reopen temporary archive", e))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| MaterializeError::extract_with("not a readable zip archive", e))?;

        if archive.len() > self.limits.max_entries {
            return Err(MaterializeError::extract(format!(
                "archive has {} entries, exceeding the limit of {}",
                archive.len(),
                self.limits.max_entries
            )));
        }

        let mut total: u64 = 0;
        for i in 0..archive.len() {
            let mut entry = archive
                .by_index(i)
                .map_err(|e| MaterializeError::extract_with(format!("failed to read entry {i}"), e))?;
            let name = entry.name().to_string();

            let Some(relative) = entry.enclosed_name() else {
                return Err(MaterializeError::extract(format!(
                    "unsafe path in archive: '{name}'"
                )));
            };
            check_relative(&relative, &name)?;

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & 0o170_000 == 0o120_000)
            {
                return Err(MaterializeError::extract(format!(
                    "symlink entries are not allowed: '{name}'"
                )));
            }

            let Some(top) = top_level(&relative) else {
                return Err(MaterializeError::extract(format!(
                    "unsafe path in archive: '{name}'"
                )));
            };
            let depth = relative
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .count();
            if !entry.is_dir() && depth < 2 {
                return Err(MaterializeError::extract(format!(
                    "expected a root folder, found top-level file '{name}'"
                )));
            }
            if !claimed.contains(&top) {
                self.claim(&top)?;
                claimed.insert(top);
            }

            let target = self.install_root.join(&relative);
            if entry.is_dir() {
                std::fs::create_dir_all(&target).map_err(|e| {
                    MaterializeError::extract_with(format!("failed to create {}", target.display()), e)
                })?;
                continue;
            }

            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MaterializeError::extract_with(format!("failed to create {}", parent.display()), e)
                })?;
            }

            let remaining = self.limits.max_total_bytes.saturating_sub(total);
            let mut out = File::create(&target).map_err(|e| {
                MaterializeError::extract_with(format!("failed to create {}", target.display()), e)
            })?;
            let written = io::copy(&mut (&mut entry).take(remaining.saturating_add(1)), &mut out)
                .map_err(|e| MaterializeError::extract_with(format!("failed to extract '{name}'"), e))?;
            total = total.saturating_add(written);
            if total > self.limits.max_total_bytes {
                return Err(MaterializeError::extract(format!(
                    "archive exceeds maximum extracted size ({} bytes)",
                    self.limits.max_total_bytes
                )));
            }
        }

        debug!(entries = archive.len(), bytes = total, "archive entries written");
        Ok(())
    }

    /// Create `install_root/{top}` for this archive.
    ///
    /// Hidden names are refused, as is anything already present under that
    /// name (directory, file or symlink), so extraction only ever writes
    /// into folders it made itself.
    fn claim(&self, top: &str) -> Result<(), MaterializeError> {
        if top.starts_with('.') {
            return Err(MaterializeError::extract(format!(
                "hidden top-level entry '{top}' is not allowed"
            )));
        }

        let path = self.install_root.join(top);
        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                return Err(MaterializeError::extract(format!(
                    "archive folder '{top}' already exists in the install root"
                )));
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => {
                return Err(MaterializeError::extract_with(
                    format!("failed to inspect {}", path.display()),
                    e,
                ));
            },
        }

        // create_dir fails with AlreadyExists if the name appeared since the check.
        std::fs::create_dir(&path).map_err(|e| {
            MaterializeError::extract_with(format!("failed to create {}", path.display()), e)
        })
    }

    fn remove_created(&self, created: &BTreeSet<String>) {
        for name in created {
            let path = self.install_root.join(name);
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(path = %path.display(), error = %e, "failed to remove partially extracted folder");
            }
        }
    }
}

fn write_temp_archive(bytes: &[u8], repo: &str) -> Result<tempfile::NamedTempFile, MaterializeError> {
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{repo}-"))
        .suffix(".zip")
        .tempfile()
        .map_err(MaterializeError::TmpCreate)?;

    let persist_err = |path: &Path, message: &str, source: Option<io::Error>| {
        MaterializeError::Persist {
            path: path.to_path_buf(),
            message: message.to_string(),
            source,
        }
    };

    tmp.write_all(bytes)
        .and_then(|()| tmp.flush())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| persist_err(tmp.path(), "write failed", Some(e)))?;

    let on_disk = tmp
        .as_file()
        .metadata()
        .map_err(|e| persist_err(tmp.path(), "could not stat", Some(e)))?
        .len();
    let expected = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
    if on_disk != expected {
        return Err(persist_err(
            tmp.path(),
            &format!("wrote {on_disk} of {expected} bytes"),
            None,
        ));
    }

    debug!(path = %tmp.path().display(), bytes = on_disk, "archive written to temporary file");
    Ok(tmp)
}

fn check_relative(relative: &Path, name: &str) -> Result<(), MaterializeError> {
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if safe && relative.components().next().is_some() {
        Ok(())
    } else {
        Err(MaterializeError::extract(format!(
            "unsafe path in archive: '{name}'"
        )))
    }
}

fn top_level(relative: &Path) -> Option<String> {
    relative.components().find_map(|c| match c {
        Component::Normal(s) => s.to_str().map(str::to_string),
        _ => None,
    })
}

/// Names of the non-hidden directories directly under `root`.
///
/// Symlinks are not followed. Hidden entries are skipped so in-flight
/// backups and lock files never look like extraction output.
///
/// # Errors
///
/// Returns the IO error if `root` cannot be read.
pub fn list_directories(root: &Path) -> io::Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string()
            && !name.starts_with('.')
        {
            names.insert(name);
        }
    }
    Ok(names)
}

/// Directories in `after` that were not in `before`.
#[must_use]
pub fn created_directories(before: &BTreeSet<String>, after: &BTreeSet<String>) -> BTreeSet<String> {
    after.difference(before).cloned().collect()
}

/// Pick the folder an archive for `owner/repo` produced.
///
/// Prefers the first name (in sorted order) that contains `owner` followed
/// later by `repo`, compared case-insensitively. Otherwise the first created
/// name. `None` if nothing was created.
#[must_use]
pub fn discover_folder(created: &BTreeSet<String>, owner: &str, repo: &str) -> Option<String> {
    let owner = owner.to_lowercase();
    let repo = repo.to_lowercase();

    created
        .iter()
        .find(|name| {
            let name = name.to_lowercase();
            name.find(&owner).is_some_and(|at| {
                name.get(at.saturating_add(owner.len())..)
                    .is_some_and(|rest| rest.contains(&repo))
            })
        })
        .or_else(|| created.iter().next())
        .cloned()
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use zip::write::SimpleFileOptions;

    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn acme() -> RepositoryReference {
        RepositoryReference::parse("acme/widgets").unwrap()
    }

    #[test]
    fn diff_reports_only_new_directories() {
        let before = set(&["A", "B"]);
        let after = set(&["A", "B", "C"]);
        assert_eq!(created_directories(&before, &after), set(&["C"]));
    }

    #[test]
    fn discovery_prefers_owner_then_repo() {
        let created = set(&["acme-widgets-abc123"]);
        assert_eq!(
            discover_folder(&created, "acme", "widgets").as_deref(),
            Some("acme-widgets-abc123")
        );

        let created = set(&["aaa-unrelated", "ACME-Widgets-ff00"]);
        assert_eq!(
            discover_folder(&created, "acme", "widgets").as_deref(),
            Some("ACME-Widgets-ff00")
        );
    }

    #[test]
    fn discovery_requires_owner_before_repo() {
        let created = set(&["b-widgets-acme", "z-other"]);
        assert_eq!(
            discover_folder(&created, "acme", "widgets").as_deref(),
            Some("b-widgets-acme")
        );
        assert_eq!(discover_folder(&BTreeSet::new(), "acme", "widgets"), None);
    }

    #[test]
    fn listing_skips_files_and_hidden_directories() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("visible")).unwrap();
        std::fs::create_dir(root.path().join(".hidden")).unwrap();
        std::fs::write(root.path().join("file.txt"), b"x").unwrap();

        assert_eq!(list_directories(root.path()).unwrap(), set(&["visible"]));
    }

    #[test]
    fn extracts_and_discovers() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("existing")).unwrap();
        let bytes = zip_of(&[
            ("acme-widgets-abc123/", b""),
            ("acme-widgets-abc123/plugin.toml", b"name = \"widgets\"\n"),
            ("acme-widgets-abc123/src/lib.txt", b"hello"),
        ]);

        let outcome = Materializer::new(root.path())
            .materialize(&bytes, &acme())
            .unwrap();

        assert_eq!(outcome.discovered_folder, "acme-widgets-abc123");
        assert_eq!(outcome.created_directories, set(&["acme-widgets-abc123"]));
        assert_eq!(
            std::fs::read(root.path().join("acme-widgets-abc123/src/lib.txt")).unwrap(),
            b"hello"
        );
    }

    #[test]
    fn corrupt_archive_is_extract_error() {
        let root = tempfile::tempdir().unwrap();
        let result = Materializer::new(root.path()).materialize(b"definitely not a zip", &acme());
        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert!(list_directories(root.path()).unwrap().is_empty());
    }

    #[test]
    fn empty_archive_is_folder_not_found() {
        let root = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[]);
        let result = Materializer::new(root.path()).materialize(&bytes, &acme());
        assert!(matches!(result, Err(MaterializeError::FolderNotFound)));
    }

    #[test]
    fn traversal_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[("acme-widgets-1/ok.txt", b"ok"), ("../escape.txt", b"bad")]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert!(!root.path().parent().unwrap().join("escape.txt").exists());
        // The partially written folder is cleaned up.
        assert!(list_directories(root.path()).unwrap().is_empty());
    }

    #[test]
    fn top_level_files_are_rejected() {
        let root = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[("README.md", b"flat")]);
        let result = Materializer::new(root.path()).materialize(&bytes, &acme());
        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert!(!root.path().join("README.md").exists());
    }

    #[test]
    fn existing_folder_is_never_written_into() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("widgets")).unwrap();
        std::fs::write(root.path().join("widgets/keep.txt"), b"original").unwrap();
        let bytes = zip_of(&[("widgets/keep.txt", b"replaced")]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert_eq!(
            std::fs::read(root.path().join("widgets/keep.txt")).unwrap(),
            b"original"
        );
    }

    #[test]
    fn limits_are_enforced() {
        let root = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[
            ("acme-widgets-1/a.txt", b"aaaa"),
            ("acme-widgets-1/b.txt", b"bbbb"),
        ]);

        let few_entries = Materializer::new(root.path()).with_limits(ExtractLimits {
            max_entries: 1,
            max_total_bytes: 1_000,
        });
        assert!(matches!(
            few_entries.materialize(&bytes, &acme()),
            Err(MaterializeError::Extract { .. })
        ));

        let few_bytes = Materializer::new(root.path()).with_limits(ExtractLimits {
            max_entries: 10,
            max_total_bytes: 6,
        });
        assert!(matches!(
            few_bytes.materialize(&bytes, &acme()),
            Err(MaterializeError::Extract { .. })
        ));
        assert!(list_directories(root.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_folder_is_not_written_through() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), root.path().join("linked")).unwrap();
        let bytes = zip_of(&[
            ("acme-widgets-1/a.txt", b"a"),
            ("linked/pwn.txt", b"pwn"),
        ]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert!(!outside.path().join("pwn.txt").exists());
        assert!(!root.path().join("acme-widgets-1").exists());
        assert!(root.path().join("linked").symlink_metadata().is_ok());
    }

    #[test]
    fn existing_hidden_folder_is_untouched() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join(".shared")).unwrap();
        std::fs::write(root.path().join(".shared/keep.txt"), b"orig").unwrap();
        let bytes = zip_of(&[(".shared/keep.txt", b"evil")]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert_eq!(
            std::fs::read(root.path().join(".shared/keep.txt")).unwrap(),
            b"orig"
        );
    }

    #[test]
    fn hidden_archive_folder_leaves_nothing_behind() {
        let root = tempfile::tempdir().unwrap();
        let bytes = zip_of(&[("acme-widgets-1/a.txt", b"a"), (".foo/x.txt", b"x")]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert!(!root.path().join(".foo").exists());
        assert!(!root.path().join("acme-widgets-1").exists());
    }

    #[test]
    fn existing_file_blocks_folder_of_same_name() {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("acme-widgets-1"), b"a file").unwrap();
        let bytes = zip_of(&[("acme-widgets-1/a.txt", b"a")]);

        let result = Materializer::new(root.path()).materialize(&bytes, &acme());

        assert!(matches!(result, Err(MaterializeError::Extract { .. })));
        assert_eq!(std::fs::read(root.path().join("acme-widgets-1")).unwrap(), b"a file");
    }
}
