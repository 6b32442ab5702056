//! List installed plugins and where they came from.

use std::collections::BTreeMap;

use anyhow::Context;
use graft_config::Config;
use graft_install::{DirectoryRegistry, MappingStore, PluginRegistry, RepositoryMapping, plugin_slug};

use crate::config_bridge::open_store;
use crate::theme::Theme;

/// Print every recorded folder with its repository and install time, then
/// any registered plugin that has no recorded repository.
pub(crate) fn run_list(config: &Config) -> anyhow::Result<()> {
    let mappings = MappingStore::new(open_store(config));
    let entries = mappings
        .entries()
        .context("failed to read repository mappings")?;
    let registry = DirectoryRegistry::new(&config.install.root, &config.install.manifest_file);
    let unmapped = unmapped_plugins(&registry, &entries);

    if entries.is_empty() && unmapped.is_empty() {
        println!("{}", Theme::info("No plugins installed yet."));
        return Ok(());
    }

    if !entries.is_empty() {
        println!("\n{}", Theme::header("Installed from GitHub"));
        for (folder, mapping) in &entries {
            let installed = mapping.installed_at.format("%Y-%m-%d %H:%M UTC");
            println!(
                "  {folder:<24} {}/{}  {}",
                mapping.owner,
                mapping.repo,
                Theme::dimmed(&installed.to_string())
            );
            if !config.install.root.join(folder).is_dir() {
                println!(
                    "  {}",
                    Theme::warning(&format!("'{folder}' is no longer present in the plugin root"))
                );
            }
        }
    }

    if !unmapped.is_empty() {
        println!("\n{}", Theme::header("Other registered plugins"));
        for (folder, plugin) in &unmapped {
            println!("  {folder:<24} {}", Theme::dimmed(plugin));
        }
    }
    println!();

    Ok(())
}

/// Registered plugins whose folder has no recorded repository, keyed by
/// folder.
fn unmapped_plugins(
    registry: &dyn PluginRegistry,
    entries: &BTreeMap<String, RepositoryMapping>,
) -> BTreeMap<String, String> {
    registry
        .registered_plugins()
        .into_iter()
        .filter_map(|plugin| plugin_slug(&plugin).map(|folder| (folder, plugin)))
        .filter(|(folder, _)| !entries.contains_key(folder))
        .collect()
}

#[cfg(test)]
mod tests {
    use graft_install::StaticRegistry;

    use super::*;

    #[test]
    fn only_plugins_without_mapping_are_listed() {
        let registry = StaticRegistry::new(["hello-world/plugin.toml", "Local.Tool/plugin.toml"]);
        let mut entries = BTreeMap::new();
        entries.insert(
            "hello-world".to_owned(),
            RepositoryMapping {
                owner: "octo".to_owned(),
                repo: "hello-world".to_owned(),
                installed_at: "2024-01-01T00:00:00Z".parse().unwrap(),
            },
        );

        let unmapped = unmapped_plugins(&registry, &entries);

        assert_eq!(unmapped.len(), 1);
        assert_eq!(
            unmapped.get("localtool").map(String::as_str),
            Some("Local.Tool/plugin.toml")
        );
    }
}
