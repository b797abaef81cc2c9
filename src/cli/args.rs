use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "scribeline")]
#[command(about = "Meeting transcript lifecycle reconciliation", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Run the service: timers, webhook and API (the default)
    Serve,
    /// Discover meetings from the upstream calendars
    Discover(DiscoverCliArgs),
    /// Advance due meeting records one step
    Advance(AdvanceCliArgs),
    /// Renew subscriptions inside their lead window
    Renew,
    /// Re-arm a failed meeting record
    Replay(ReplayCliArgs),
    /// List meeting records
    List(ListCliArgs),
    /// Show one meeting record
    Show(ShowCliArgs),
    /// Manage the hosts that get event subscriptions
    Hosts(HostsCliArgs),
    /// Inspect the configuration
    Config(ConfigCliArgs),
    /// Print version information
    Version,
}

#[derive(ClapArgs, Debug)]
pub struct DiscoverCliArgs {
    /// Look back this many hours instead of the configured window
    #[arg(long)]
    pub hours: Option<u64>,
}

#[derive(ClapArgs, Debug)]
pub struct AdvanceCliArgs {
    /// Only advance this meeting id
    #[arg(long)]
    pub meeting: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct ReplayCliArgs {
    /// Meeting id to replay
    pub id: String,
}

#[derive(ClapArgs, Debug)]
pub struct ListCliArgs {
    /// Filter by lifecycle state (e.g. transcript_pending, failed)
    #[arg(short, long)]
    pub state: Option<String>,
    /// Maximum number of records to show
    #[arg(short, long, default_value = "50")]
    pub limit: usize,
}

#[derive(ClapArgs, Debug)]
pub struct ShowCliArgs {
    /// Meeting id
    pub id: String,
}

#[derive(ClapArgs, Debug)]
pub struct HostsCliArgs {
    #[command(subcommand)]
    pub command: HostsCommand,
}

#[derive(Subcommand, Debug)]
pub enum HostsCommand {
    /// Create subscription records for every eligible host
    Sync,
}

#[derive(ClapArgs, Debug)]
pub struct ConfigCliArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the effective configuration with secrets masked
    Show,
    /// Validate the configuration
    Check,
    /// Print the config file location
    Path,
}
