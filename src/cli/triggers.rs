use crate::app::build_services;
use crate::config::Config;
use crate::engine::Scope;
use crate::model::MeetingId;
use anyhow::Result;
use chrono::Utc;

use super::args::{AdvanceCliArgs, DiscoverCliArgs, HostsCliArgs, HostsCommand};
use super::print_json;

pub async fn handle_discover_command(args: DiscoverCliArgs, config: &Config) -> Result<()> {
    let services = build_services(config)?;
    let lookback = match args.hours {
        Some(hours) => chrono::Duration::hours(i64::try_from(hours.min(24 * 366))?),
        None => services.engine.settings().discovery_lookback,
    };
    let summary = services.engine.discover_upstream(lookback).await?;
    print_json(&summary)
}

pub async fn handle_advance_command(args: AdvanceCliArgs, config: &Config) -> Result<()> {
    let services = build_services(config)?;
    let scope = match args.meeting {
        Some(id) => Scope::Single(MeetingId::from_raw(id)),
        None => Scope::All,
    };
    let summary = services.engine.advance(scope).await?;
    print_json(&summary)
}

pub async fn handle_renew_command(config: &Config) -> Result<()> {
    let services = build_services(config)?;
    let summary = services.renewal.ensure_fresh(Utc::now()).await?;
    print_json(&summary)
}

pub async fn handle_hosts_command(args: HostsCliArgs, config: &Config) -> Result<()> {
    match args.command {
        HostsCommand::Sync => {
            let services = build_services(config)?;
            let summary = services.renewal.sync_hosts().await?;
            print_json(&summary)
        }
    }
}
