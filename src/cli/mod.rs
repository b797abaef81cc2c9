pub mod args;
pub mod config;
pub mod meetings;
pub mod triggers;

pub use args::{Cli, CliCommand};
pub use config::handle_config_command;
pub use meetings::{handle_list_command, handle_replay_command, handle_show_command};
pub use triggers::{
    handle_advance_command, handle_discover_command, handle_hosts_command, handle_renew_command,
};

use anyhow::{Context, Result};
use serde::Serialize;

/// Outcome summaries are printed as pretty JSON so scripts can consume them.
pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
