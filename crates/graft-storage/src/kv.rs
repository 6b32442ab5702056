//! The [`KvStore`] trait and its in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::RwLock;

use crate::error::{StorageError, StorageResult};

/// Maximum length of a namespace or key.
const MAX_KEY_LEN: usize = 128;

/// Mutation applied by [`KvStore::update`].
///
/// Receives the current value (if any) and returns the value to store, or
/// `None` to delete the key.
pub type UpdateFn<'a> = dyn FnMut(Option<String>) -> StorageResult<Option<String>> + 'a;

/// Namespaced string key-value store.
///
/// Implementations must make [`update`](KvStore::update) atomic for a single
/// key: no other writer may interleave between the read and the write.
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Short backend name, used in log lines.
    fn name(&self) -> &'static str;

    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend cannot be read.
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend cannot be written.
    fn set(&self, namespace: &str, key: &str, value: String) -> StorageResult<()>;

    /// Delete a value. Returns `true` if a value was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid or the backend cannot be written.
    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// List the keys present in a namespace, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace is invalid or the backend cannot be read.
    fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>>;

    /// Atomically read, transform and write one key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is invalid, the backend fails, or `f` fails.
    /// When `f` fails nothing is written.
    fn update(&self, namespace: &str, key: &str, f: &mut UpdateFn<'_>) -> StorageResult<()>;
}

/// Validate a namespace or key.
///
/// Accepts 1-128 characters of ASCII alphanumerics, `-`, `_`, `.` and `:`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidKey`] otherwise.
pub fn validate_key(value: &str) -> StorageResult<()> {
    if value.is_empty() || value.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "must be 1-{MAX_KEY_LEN} characters, got {}",
            value.len()
        )));
    }
    let is_valid = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
    if !is_valid {
        return Err(StorageError::InvalidKey(format!(
            "contains invalid characters: '{value}'"
        )));
    }
    Ok(())
}

type Namespaces = BTreeMap<String, BTreeMap<String, String>>;

/// In-memory [`KvStore`].
///
/// Contents are lost when the store is dropped.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: RwLock<Namespaces>,
}

impl MemoryKvStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> StorageError {
    StorageError::Internal("memory store lock poisoned".into())
}

impl KvStore for MemoryKvStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        validate_key(namespace)?;
        validate_key(key)?;
        let data = self.data.read().map_err(poisoned)?;
        Ok(data.get(namespace).and_then(|ns| ns.get(key)).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: String) -> StorageResult<()> {
        validate_key(namespace)?;
        validate_key(key)?;
        let mut data = self.data.write().map_err(poisoned)?;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        validate_key(namespace)?;
        validate_key(key)?;
        let mut data = self.data.write().map_err(poisoned)?;
        Ok(data
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    fn list_keys(&self, namespace: &str) -> StorageResult<Vec<String>> {
        validate_key(namespace)?;
        let data = self.data.read().map_err(poisoned)?;
        Ok(data
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn update(&self, namespace: &str, key: &str, f: &mut UpdateFn<'_>) -> StorageResult<()> {
        validate_key(namespace)?;
        validate_key(key)?;
        // Held for the whole closure so the read-modify-write is atomic.
        let mut data = self.data.write().map_err(poisoned)?;
        let current = data.get(namespace).and_then(|ns| ns.get(key)).cloned();
        match f(current)? {
            Some(value) => {
                data.entry(namespace.to_string())
                    .or_default()
                    .insert(key.to_string(), value);
            },
            None => {
                if let Some(ns) = data.get_mut(namespace) {
                    ns.remove(key);
                }
            },
        }
        Ok(())
    }
}
