use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(name = "cairn", version, about = "Cairn profile, backup and lifecycle manager")]
pub struct Cli {
    /// User data root (overrides the config file and the platform default)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML config file; built-in defaults when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Start up, serve the API until Ctrl-C, then shut down in order
    Run,
    /// Profile operations
    #[command(subcommand)]
    Profile(ProfileCmd),
    /// Take a manual backup now (never pruned by rotation)
    Backup,
    /// Pre-update hook: optional backup and the justUpdated flag
    PrepareUpdate,
}

#[derive(Debug, Subcommand, Clone)]
pub enum ProfileCmd {
    List,
    Create,
    Switch { id: u32 },
    /// Mark for deletion; the folder is removed at the next shutdown
    Delete { id: u32 },
}
