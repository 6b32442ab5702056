//! Lookup of plugins the host already has registered.

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

/// Source of registered plugin paths.
///
/// Paths are relative to the install root and use `/` as separator, e.g.
/// `hello-world/plugin.toml`.
pub trait PluginRegistry: Send + Sync + fmt::Debug {
    /// All registered plugin paths.
    fn registered_plugins(&self) -> Vec<String>;

    /// First registered plugin living inside `folder`, if any.
    fn find_in_folder(&self, folder: &str) -> Option<String> {
        let prefix = format!("{folder}/");
        self.registered_plugins()
            .into_iter()
            .find(|path| path.starts_with(&prefix))
    }
}

/// Fixed list of plugin paths, for hosts that track registration
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    plugins: Vec<String>,
}

impl StaticRegistry {
    /// Create a registry holding `plugins`.
    #[must_use]
    pub fn new(plugins: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            plugins: plugins.into_iter().map(Into::into).collect(),
        }
    }
}

impl PluginRegistry for StaticRegistry {
    fn registered_plugins(&self) -> Vec<String> {
        self.plugins.clone()
    }
}

/// Treats every directory under the install root that contains a manifest
/// file as a registered plugin.
#[derive(Debug, Clone)]
pub struct DirectoryRegistry {
    root: PathBuf,
    manifest_file: String,
}

impl DirectoryRegistry {
    /// Scan `root` for `*/manifest_file`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, manifest_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            manifest_file: manifest_file.into(),
        }
    }
}

impl PluginRegistry for DirectoryRegistry {
    fn registered_plugins(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "failed to scan for registered plugins");
                return Vec::new();
            },
        };

        let mut plugins: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .filter(|name| self.root.join(name).join(&self.manifest_file).is_file())
            .map(|name| format!("{name}/{}", self.manifest_file))
            .collect();
        plugins.sort();
        plugins
    }
}
