use crate::config::Config;
use crate::db::{MeetingFilter, MetadataStore, SqliteMetadataStore};
use crate::engine::ReplayOutcome;
use crate::model::{LifecycleState, MeetingId};
use anyhow::{anyhow, Result};

use super::args::{ListCliArgs, ReplayCliArgs, ShowCliArgs};
use super::print_json;

fn open_store(config: &Config) -> Result<SqliteMetadataStore> {
    SqliteMetadataStore::open(&config.store.database_path()?)
}

pub async fn handle_list_command(args: ListCliArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let state = args.state.as_deref().map(LifecycleState::parse).transpose()?;
    let records = store
        .list_meetings(&MeetingFilter {
            state,
            limit: Some(args.limit),
        })
        .await?;

    if records.is_empty() {
        println!("No meetings found matching your criteria.");
        return Ok(());
    }

    println!("Found {} meeting(s):\n", records.len());
    for record in records {
        println!("ID:       {}", record.id);
        println!("Subject:  {}", record.subject);
        println!("Start:    {}", record.start_time.format("%Y-%m-%d %H:%M UTC"));
        println!(
            "State:    {} (attempts {}, not-ready checks {})",
            record.lifecycle_state, record.attempt_count, record.deferral_count
        );
        if let Some(error) = &record.last_error {
            println!("Error:    {}", error);
        }
        println!("---");
    }

    println!("\nTo see a full record, use: scribeline show <ID>");
    Ok(())
}

pub async fn handle_show_command(args: ShowCliArgs, config: &Config) -> Result<()> {
    let store = open_store(config)?;
    let record = store
        .get(&MeetingId::from_raw(args.id.clone()))
        .await?
        .ok_or_else(|| anyhow!("Meeting {} not found", args.id))?;
    print_json(&record)
}

pub async fn handle_replay_command(args: ReplayCliArgs, config: &Config) -> Result<()> {
    let services = crate::app::build_services(config)?;
    let outcome = services
        .engine
        .replay(&MeetingId::from_raw(args.id.clone()))
        .await?;
    print_json(&outcome)?;
    match outcome {
        ReplayOutcome::NotFound => Err(anyhow!("Meeting {} not found", args.id)),
        ReplayOutcome::Contended => Err(anyhow!(
            "Meeting {} is being updated concurrently, try again",
            args.id
        )),
        _ => Ok(()),
    }
}
