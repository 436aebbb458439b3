use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use reststore_types::PathProcessingStrategy;

#[derive(Parser)]
#[command(
    name = "reststore",
    about = "rest-storage: a hierarchical document store served over HTTP",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Print the effective configuration as TOML
    Config(ConfigArgs),
}

/// Settings shared by every command. Flags override the config file.
#[derive(Args, Default)]
pub struct SettingsArgs {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Directory holding the stored tree
    #[arg(long)]
    pub root: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    /// URL prefix the store is served under, e.g. /storage
    #[arg(long)]
    pub prefix: Option<String>,
    /// Refuse to delete non-empty collections without recursive=true
    #[arg(long)]
    pub confirm_collection_delete: bool,
    #[arg(long)]
    pub path_processing_strategy: Option<PathProcessingStrategy>,
}

#[derive(Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(flatten)]
    pub settings: SettingsArgs,
}
