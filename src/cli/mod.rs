pub mod chat;
pub mod config;
pub mod paths;
pub mod project;
pub mod serve;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "design-ide")]
#[command(
    author,
    version,
    about = "A design-first prototyping assistant: five live variants before any code"
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "DESIGN_IDE_CONFIG")]
    pub config: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve(serve::ServeArgs),

    /// Design interactively in the terminal
    Chat(chat::ChatArgs),

    /// Inspect stored projects
    Project(project::ProjectArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// Show resolved XDG directory paths
    Paths,
}

/// Load the config from `--config` when given, otherwise from the XDG location.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::load_file(path),
        None => Config::load(),
    }
}
