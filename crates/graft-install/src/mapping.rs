//! Folder to repository mapping.
//!
//! One JSON record under `graft/repo_map` maps each installed folder name to
//! the repository it came from, so a later update knows what to fetch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use graft_storage::{KvStore, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::fetch::STATE_NAMESPACE;
use crate::source::RepositoryReference;

/// Key under [`STATE_NAMESPACE`] holding the mapping record.
pub const MAPPING_KEY: &str = "repo_map";

/// Where an installed folder came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMapping {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// When the folder was last installed or updated.
    pub installed_at: DateTime<Utc>,
}

impl RepositoryMapping {
    /// Rebuild the repository reference.
    ///
    /// # Errors
    ///
    /// Fails if the stored segments are no longer valid slugs.
    pub fn reference(&self) -> Result<RepositoryReference, crate::error::ParseError> {
        RepositoryReference::from_parts(&self.owner, &self.repo)
    }
}

type MappingRecord = BTreeMap<String, RepositoryMapping>;

/// Durable `folder -> {owner, repo}` store.
#[derive(Debug, Clone)]
pub struct MappingStore {
    store: Arc<dyn KvStore>,
}

impl MappingStore {
    /// Create a mapping store over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    /// Record that `folder` was installed from `reference`, replacing any
    /// previous entry.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the record cannot be read or written.
    pub fn put(&self, folder: &str, reference: &RepositoryReference) -> StorageResult<()> {
        let entry = RepositoryMapping {
            owner: reference.owner().to_string(),
            repo: reference.repo().to_string(),
            installed_at: Utc::now(),
        };

        self.store
            .update(STATE_NAMESPACE, MAPPING_KEY, &mut |current| {
                let mut record = decode(current.as_deref())?;
                record.insert(folder.to_string(), entry.clone());
                encode(&record).map(Some)
            })?;

        debug!(folder, repository = %reference, "recorded repository mapping");
        Ok(())
    }

    /// Look up the mapping for `folder`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the record cannot be read or decoded.
    pub fn get(&self, folder: &str) -> StorageResult<Option<RepositoryMapping>> {
        Ok(self.entries()?.remove(folder))
    }

    /// All mappings, ordered by folder name.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the record cannot be read or decoded.
    pub fn entries(&self) -> StorageResult<BTreeMap<String, RepositoryMapping>> {
        let raw = self.store.get(STATE_NAMESPACE, MAPPING_KEY)?;
        decode(raw.as_deref())
    }
}

fn decode(raw: Option<&str>) -> StorageResult<MappingRecord> {
    match raw {
        None => Ok(MappingRecord::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| StorageError::Serialization(format!("repository mapping: {e}"))),
    }
}

fn encode(record: &MappingRecord) -> StorageResult<String> {
    serde_json::to_string(record)
        .map_err(|e| StorageError::Serialization(format!("repository mapping: {e}")))
}

/// Derive the folder key for a registered plugin file.
///
/// `dir/file.ext` gives `dir`; a bare `file.ext` gives `file`. The result is
/// lowercased and reduced to `[a-z0-9_-]`; `None` if nothing is left.
#[must_use]
pub fn plugin_slug(plugin_file: &str) -> Option<String> {
    let plugin_file = plugin_file.trim().trim_start_matches('/');
    let raw = match plugin_file.split_once('/') {
        Some((dir, _)) => dir,
        None => plugin_file
            .rsplit_once('.')
            .map_or(plugin_file, |(stem, _)| stem),
    };

    let slug: String = raw
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(*c, '-' | '_'))
        .collect();
    (!slug.is_empty()).then_some(slug)
}

#[cfg(test)]
mod tests {
    use graft_storage::MemoryKvStore;

    use super::*;

    fn store() -> MappingStore {
        MappingStore::new(Arc::new(MemoryKvStore::new()))
    }

    #[test]
    fn put_then_get() {
        let mappings = store();
        let reference = RepositoryReference::parse("octo/hello-world").unwrap();

        assert_eq!(mappings.get("hello-world").unwrap(), None);
        mappings.put("hello-world", &reference).unwrap();

        let entry = mappings.get("hello-world").unwrap().unwrap();
        assert_eq!(entry.owner, "octo");
        assert_eq!(entry.repo, "hello-world");
        assert_eq!(entry.reference().unwrap(), reference);
    }

    #[test]
    fn put_overwrites_and_keeps_others() {
        let mappings = store();
        mappings
            .put("widgets", &RepositoryReference::parse("acme/widgets").unwrap())
            .unwrap();
        mappings
            .put("gadgets", &RepositoryReference::parse("acme/gadgets").unwrap())
            .unwrap();
        mappings
            .put("widgets", &RepositoryReference::parse("fork/widgets").unwrap())
            .unwrap();

        let entries = mappings.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["widgets"].owner, "fork");
        assert_eq!(entries["gadgets"].owner, "acme");
    }

    #[test]
    fn corrupt_record_is_serialization_error() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(STATE_NAMESPACE, MAPPING_KEY, "{not json".into())
            .unwrap();
        let mappings = MappingStore::new(kv);

        assert!(matches!(
            mappings.get("x"),
            Err(StorageError::Serialization(_))
        ));
    }

    #[test]
    fn slug_from_plugin_file() {
        assert_eq!(plugin_slug("hello-world/plugin.toml").as_deref(), Some("hello-world"));
        assert_eq!(plugin_slug("Single.toml").as_deref(), Some("single"));
        assert_eq!(plugin_slug("my.plugin/main.toml").as_deref(), Some("myplugin"));
        assert_eq!(plugin_slug("noext").as_deref(), Some("noext"));
        assert_eq!(plugin_slug("!!!/x.toml"), None);
        assert_eq!(plugin_slug(""), None);
    }
}
