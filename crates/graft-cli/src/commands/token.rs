//! Store or clear the access token used for archive downloads.

use std::io::BufRead;

use anyhow::{Context, bail};
use graft_config::Config;
use graft_install::fetch::{STATE_NAMESPACE, TOKEN_KEY};
use graft_storage::KvStore;

use crate::config_bridge::open_store;
use crate::theme::Theme;

/// Save `token`, or a line read from stdin when it is absent.
pub(crate) fn set_token(config: &Config, token: Option<String>) -> anyhow::Result<()> {
    let token = match token {
        Some(token) => token,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .context("failed to read token from stdin")?;
            line
        },
    };

    let store = open_store(config);
    save_token(store.as_ref(), &token)?;

    println!("{}", Theme::success("Token saved."));
    if config.remote.token.is_some() {
        println!(
            "{}",
            Theme::warning("A token is also configured (GRAFT_TOKEN or [remote] token) and takes precedence.")
        );
    }
    Ok(())
}

/// Remove the saved token.
pub(crate) fn clear_token(config: &Config) -> anyhow::Result<()> {
    let store = open_store(config);
    let removed = store
        .delete(STATE_NAMESPACE, TOKEN_KEY)
        .context("failed to clear token")?;

    if removed {
        println!("{}", Theme::success("Token cleared."));
    } else {
        println!("{}", Theme::info("No token was saved."));
    }
    Ok(())
}

fn save_token(store: &dyn KvStore, token: &str) -> anyhow::Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("token is empty");
    }
    store
        .set(STATE_NAMESPACE, TOKEN_KEY, token.to_owned())
        .context("failed to save token")
}
