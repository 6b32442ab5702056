//! Graft CLI: install and update plugins from GitHub repositories.
//!
//! A thin host over `graft-install`: it loads configuration, sets up
//! logging, passes raw user input to the installer and prints the result.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod config_bridge;
mod theme;

use commands::{install, list, token};

/// Graft - plugin installer for GitHub repositories
#[derive(Parser)]
#[command(name = "graft")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to an extra configuration file
    #[arg(short, long, global = true, env = "GRAFT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a plugin from a GitHub repository
    Install {
        /// Repository as owner/repo, an https URL or git@host:owner/repo
        repository: String,

        /// Branch, tag or commit (default: the repository's default branch)
        #[arg(short = 'r', long = "ref")]
        git_ref: Option<String>,
    },

    /// Re-fetch an installed plugin from the repository it came from
    Update {
        /// Plugin folder name
        folder: String,

        /// Branch, tag or commit (default: the repository's default branch)
        #[arg(short = 'r', long = "ref")]
        git_ref: Option<String>,
    },

    /// List plugins installed from GitHub and other registered plugins
    List,

    /// Manage the saved access token
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Save a token (read from stdin when omitted)
    Set {
        /// The token
        token: Option<String>,
    },
    /// Remove the saved token
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = graft_config::Config::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = loaded.config;

    let mut log_config = config_bridge::to_log_config(&config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = graft_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }
    tracing::debug!(
        graft_home = %loaded.graft_home.display(),
        files = ?loaded.loaded_files,
        "configuration loaded"
    );

    match cli.command {
        Commands::Install {
            repository,
            git_ref,
        } => {
            install::run_install(&config, &repository, git_ref.as_deref()).await?;
        },
        Commands::Update { folder, git_ref } => {
            install::run_update(&config, &folder, git_ref.as_deref()).await?;
        },
        Commands::List => {
            list::run_list(&config)?;
        },
        Commands::Token { command } => match command {
            TokenCommands::Set { token: value } => token::set_token(&config, value)?,
            TokenCommands::Clear => token::clear_token(&config)?,
        },
    }

    Ok(())
}
