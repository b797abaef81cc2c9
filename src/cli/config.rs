use crate::config::Config;
use anyhow::{Context, Result};
use std::path::Path;

use super::args::{ConfigCliArgs, ConfigCommand};

pub fn handle_config_command(args: ConfigCliArgs, config_path: &Path) -> Result<()> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config_path.display());
            Ok(())
        }
        ConfigCommand::Show => handle_show(config_path),
        ConfigCommand::Check => handle_check(config_path),
    }
}

fn handle_show(config_path: &Path) -> Result<()> {
    let mut config = Config::load_from(config_path)?;
    config.upstream.client_secret = mask_secret(&config.upstream.client_secret);
    config.upstream.client_state = mask_secret(&config.upstream.client_state);
    config.summarizer.api_key = mask_secret(&config.summarizer.api_key);

    let rendered = toml::to_string_pretty(&config).context("Failed to serialize config")?;
    println!("# {}", config_path.display());
    println!("{}", rendered);
    Ok(())
}

fn handle_check(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)?;
    config.validate()?;

    let mut warnings = Vec::new();
    if config.upstream.tenant_id.is_empty() || config.upstream.client_id.is_empty() {
        warnings.push("upstream.tenant_id / upstream.client_id not set");
    }
    if config.upstream.client_secret.is_empty() {
        warnings.push("upstream.client_secret not set (or SCRIBELINE_CLIENT_SECRET)");
    }
    if config.summarizer.api_key.is_empty() {
        warnings.push("summarizer.api_key not set (or SCRIBELINE_SUMMARIZER_API_KEY)");
    }
    if config.upstream.organizers.is_empty() {
        warnings.push("upstream.organizers is empty, periodic discovery finds nothing");
    }
    if config.upstream.notification_url.is_empty() {
        warnings.push("upstream.notification_url not set, subscriptions cannot be created");
    }

    println!("Configuration is valid: {}", config_path.display());
    for warning in &warnings {
        println!("  warning: {}", warning);
    }
    Ok(())
}

fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    match len {
        0 => String::new(),
        1..=8 => "*".repeat(len),
        _ => {
            let prefix: String = secret.chars().take(4).collect();
            let suffix: String = secret.chars().skip(len - 2).collect();
            format!("{prefix}****{suffix}")
        }
    }
}
