use anyhow::Result;
use clap::Parser;
use scribeline::{
    app,
    cli::{
        handle_advance_command, handle_config_command, handle_discover_command,
        handle_hosts_command, handle_list_command, handle_renew_command, handle_replay_command,
        handle_show_command, Cli, CliCommand,
    },
    config::Config,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };

    match cli.command {
        Some(CliCommand::Version) => {
            println!("scribeline {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Config(args)) => {
            handle_config_command(args, &config_path)?;
            return Ok(());
        }
        Some(CliCommand::Serve) | None => {}
        Some(command) => {
            let config = Config::load_from(&config_path)?;
            match command {
                CliCommand::Discover(args) => handle_discover_command(args, &config).await?,
                CliCommand::Advance(args) => handle_advance_command(args, &config).await?,
                CliCommand::Renew => handle_renew_command(&config).await?,
                CliCommand::Replay(args) => handle_replay_command(args, &config).await?,
                CliCommand::List(args) => handle_list_command(args, &config).await?,
                CliCommand::Show(args) => handle_show_command(args, &config).await?,
                CliCommand::Hosts(args) => handle_hosts_command(args, &config).await?,
                CliCommand::Version | CliCommand::Config(_) | CliCommand::Serve => {}
            }
            return Ok(());
        }
    }

    let config = Config::load_from(&config_path)?;
    app::run_service(config).await
}
