//! Subcommand implementations.

pub(crate) mod install;
pub(crate) mod list;
pub(crate) mod token;
