//! Install and update commands.

use graft_config::Config;
use graft_install::InstallError;

use crate::config_bridge::build_installer;
use crate::theme::Theme;

/// Install the repository named by `repository` into the plugin root.
pub(crate) async fn run_install(
    config: &Config,
    repository: &str,
    git_ref: Option<&str>,
) -> anyhow::Result<()> {
    let installer = build_installer(config)?;
    let folder = installer
        .install_plugin(repository, git_ref)
        .await
        .map_err(|e| tagged(e, &format!("failed to install '{}'", repository.trim())))?;

    println!(
        "{}",
        Theme::success(&format!("Installed {} into '{folder}'", repository.trim()))
    );
    println!(
        "  {}",
        Theme::dimmed(&installer.install_root().join(&folder).display().to_string())
    );
    Ok(())
}

/// Re-fetch the repository recorded for `folder` and replace it.
pub(crate) async fn run_update(
    config: &Config,
    folder: &str,
    git_ref: Option<&str>,
) -> anyhow::Result<()> {
    let installer = build_installer(config)?;
    let folder = installer
        .update_plugin(folder, git_ref)
        .await
        .map_err(|e| tagged(e, &format!("failed to update '{}'", folder.trim())))?;

    println!("{}", Theme::success(&format!("Updated '{folder}'")));
    Ok(())
}

/// Wrap `error` with `what`, prefixed by the stable failure tag.
fn tagged(error: InstallError, what: &str) -> anyhow::Error {
    let kind = error.kind();
    anyhow::Error::new(error).context(format!("[{kind}] {what}"))
}
