//! Process entry-point CLI: launch a single node as a leader (in one of the
//! three fixed roles) or a worker, for either fleet.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fleetcore")]
#[command(about = "Launch a leader or worker node in the crawl/summarize fleet")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a leader node (primary or one of the two backups)
    Leader(LeaderArgs),
    /// Launch a worker node
    Worker(WorkerArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum FleetArg {
    Crawler,
    Summarizer,
}

impl From<FleetArg> for crate::models::FleetKind {
    fn from(f: FleetArg) -> Self {
        match f {
            FleetArg::Crawler => crate::models::FleetKind::Crawler,
            FleetArg::Summarizer => crate::models::FleetKind::Summarizer,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum LeaderRole {
    Primary,
    Backup1,
    Backup2,
}

#[derive(Parser, Debug)]
pub struct LeaderArgs {
    #[arg(long, value_enum)]
    pub fleet: FleetArg,

    #[arg(long, value_enum)]
    pub role: LeaderRole,

    /// Override the configured bind address for this node
    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    /// Override the configured port for this node
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to a .env file to load before reading configuration
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    #[arg(long, value_enum)]
    pub fleet: FleetArg,

    /// Worker identifier; must match one configured in the fleet registry
    #[arg(long)]
    pub id: String,

    #[arg(long, value_name = "ADDR")]
    pub bind_addr: Option<String>,

    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_leader_invocation() {
        let cli = Cli::parse_from([
            "fleetcore",
            "leader",
            "--fleet",
            "summarizer",
            "--role",
            "backup-1",
        ]);
        match cli.command {
            Commands::Leader(args) => {
                assert_eq!(args.fleet, FleetArg::Summarizer);
                assert_eq!(args.role, LeaderRole::Backup1);
            }
            _ => panic!("expected leader subcommand"),
        }
    }

    #[test]
    fn parses_worker_invocation_with_overrides() {
        let cli = Cli::parse_from([
            "fleetcore",
            "-vv",
            "worker",
            "--fleet",
            "crawler",
            "--id",
            "worker-2",
            "--port",
            "9500",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.id, "worker-2");
                assert_eq!(args.port, Some(9500));
            }
            _ => panic!("expected worker subcommand"),
        }
    }
}
