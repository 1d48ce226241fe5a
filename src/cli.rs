//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;
use crate::orchestrator::Action;

#[derive(Parser, Debug)]
#[command(name = "nft-blackhole")]
#[command(author, version, about = "Blocking IP addresses with nftables sets")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Create the blackhole table and load all sets
    Start,

    /// Delete the blackhole table
    Stop,

    /// Stop, then start
    Restart,

    /// Refresh set contents, keeping table and chains
    Reload,

    /// Print the generated sets without touching the firewall
    DryRun,
}

impl From<Commands> for Action {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Start => Action::Start,
            Commands::Stop => Action::Stop,
            Commands::Restart => Action::Restart,
            Commands::Reload => Action::Reload,
            Commands::DryRun => Action::DryRun,
        }
    }
}
