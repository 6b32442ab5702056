//! File-backed [`KvStore`].
//!
//! The whole store is one TOML document. Every write goes through a temp
//! file in the same directory followed by a rename, and every access takes
//! an advisory lock on a `.lk` sibling so concurrent processes see either
//! the old or the new document, never a torn one.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::kv::{KvStore, UpdateFn, validate_key};

/// Default file name for the store inside a state directory.
pub const STORE_FILE_NAME: &str = "state.toml";

const HEADER: &str = "# Auto-generated by graft. Do not edit manually.\n";

const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    schema_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// [`KvStore`] persisted to a single TOML file.
#[derive(Debug, Clone)]
pub struct FileKvStore {
    path: PathBuf,
}

impl FileKvStore {
    /// Open a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open the store at `dir/`[`STORE_FILE_NAME`].
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STORE_FILE_NAME))
    }

    /// Path to the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_error(&self, message: String) -> StorageError {
        StorageError::File {
            path: self.path.clone(),
            message,
        }
    }

    fn read_document(&self) -> StorageResult<StoreDocument> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            },
            Err(e) => return Err(self.file_error(format!("failed to read: {e}"))),
        };

        let doc: StoreDocument = toml::from_str(&content)
            .map_err(|e| StorageError::Serialization(format!("{}: {e}", self.path.display())))?;

        if doc.schema_version > SCHEMA_VERSION {
            return Err(self.file_error(format!(
                "unsupported schema version {} (expected <= {SCHEMA_VERSION})",
                doc.schema_version
            )));
        }
        Ok(doc)
    }

    fn write_document(&self, doc: &StoreDocument) -> StorageResult<()> {
        let body =
            toml::to_string_pretty(doc).map_err(|e| StorageError::Serialization(e.to_string()))?;
        let content = format!("{HEADER}{body}");

        let parent = self.parent_dir();
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| self.file_error(format!("failed to create temp file: {e}")))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| self.file_error(format!("failed to write temp file: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| self.file_error(format!("failed to sync temp file: {e}")))?;
        tmp.persist(&self.path)
            .map_err(|e| self.file_error(format!("failed to persist: {e}")))?;

        debug!(path = %self.path.display(), "wrote store file");
        Ok(())
    }

    fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }

    /// Run `f` on the document under an exclusive lock and write it back.
    fn modify<T>(&self, f: impl FnOnce(&mut StoreDocument) -> StorageResult<T>) -> StorageResult<T> {
        std::fs::create_dir_all(self.parent_dir())
            .map_err(|e| self.file_error(format!("failed to create parent directory: {e}")))?;
        let _guard = self.acquire_lock(LockMode::Exclusive)?;
        let mut doc = self.read_document()?;
        let out = f(&mut doc)?;
        self.write_document(&doc)?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> StorageResult<T> {
        let _guard = self.acquire_lock(LockMode::Shared)?;
        let doc = self.read_document()?;
        Ok(f(&doc))
    }

    fn acquire_lock(&self, mode: LockMode) -> StorageResult<Option<File>> {
        let lock_path = self.path.with_extension("lk");

        match mode {
            LockMode::Shared => {
                // No lock file means no writer has ever run.
                match std::fs::OpenOptions::new().read(true).open(&lock_path) {
                    Ok(lock_file) => {
                        lock_file.lock_shared().map_err(|e| {
                            self.file_error(format!("failed to acquire shared file lock: {e}"))
                        })?;
                        Ok(Some(lock_file))
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(self.file_error(format!("failed to open lock file: {e}"))),
                }
            },
            LockMode::Exclusive => {
                let lock_file = std::fs::OpenOptions::new()
                    .create(true)
                    .truncate(false)
                    .write(true)
                    .read(true)
                    .open(&lock_path)
                    .map_err(|e| self.file_error(format!("failed to open lock file: {e}")))?;
                lock_file.lock_exclusive().map_err(|e| {
                    self.file_error(format!("failed to acquire exclusive file lock: {e}"))
                })?;
                Ok(Some(lock_file))
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

impl KvStore for FileKvStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        validate_key(namespace)?;
        validate_key(key)?;
        self.read(|doc| {
            doc.entries
                .get(namespace)
                .and_then(|ns| ns.get(key))
                .cloned()
        })
    }

    fn set(&self, namespace: &str, key: &str, value: String) -> StorageResult<()> {
        validate_key(namespace)?;
        validate_key(key)?;
        self.modify(|doc| {
            doc.entries
                .entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value);
            Ok(())
        })
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        validate_key(namespace)?;
        validate_key(key)?;
        self.modify(|doc| {
            let Some(ns) = doc.entries.get_mut(namespace) else {
                return Ok(false);
            };
            let removed = ns.remove(key).is_some();
            if ns.is_empty() {
                doc.entries.remove(namespace);
            }
            Ok(removed)
        })
    }

    fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_key(namespace)?;
        self.read(|doc| {
            doc.entries
                .get(namespace)
                .map(|ns| ns.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn update(&self, namespace: &str, key: &str, f: &mut UpdateFn<'_>) -> StorageResult<()> {
        validate_key(namespace)?;
        validate_key(key)?;
        self.modify(|doc| {
            let current = doc.entries.get(namespace).and_then(|ns| ns.get(key)).cloned();
            match f(current)? {
                Some(value) => {
                    doc.entries
                        .entry(namespace.to_string())
                        .or_default()
                        .insert(key.to_string(), value);
                },
                None => {
                    if let Some(ns) = doc.entries.get_mut(namespace) {
                        ns.remove(key);
                        if ns.is_empty() {
                            doc.entries.remove(namespace);
                        }
                    }
                },
            }
            Ok(())
        })
    }
}
