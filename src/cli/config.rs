use anyhow::Result;
use clap::{Args, Subcommand};

use crate::config::Config;
use crate::paths::Paths;

use super::load_config;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show {
        /// Output format: toml (default) or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },

    /// Get a configuration value
    Get {
        /// Config key (e.g., server.port)
        key: String,
    },

    /// Set a value in the XDG config file
    Set {
        /// Config key (e.g., agent.default_model)
        key: String,

        /// Value to set
        value: String,
    },

    /// Show config file path
    Path,

    /// Write the commented default config file
    Init {
        /// Overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

pub fn run(args: ConfigArgs, config_file: Option<&str>) -> Result<()> {
    match args.command {
        ConfigCommands::Show { format } => show_config(config_file, &format),
        ConfigCommands::Get { key } => {
            let config = load_config(config_file)?;
            println!("{}", config.get_value(&key)?);
            Ok(())
        }
        ConfigCommands::Set { key, value } => set_config(&key, &value),
        ConfigCommands::Path => {
            match config_file {
                Some(path) => println!("{}", shellexpand::tilde(path)),
                None => println!("{}", Config::config_path()?.display()),
            }
            Ok(())
        }
        ConfigCommands::Init { force } => init_config(force),
    }
}

fn show_config(config_file: Option<&str>, format: &str) -> Result<()> {
    let config = load_config(config_file)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        "toml" => println!("{}", toml::to_string_pretty(&config)?),
        other => anyhow::bail!("Unknown format '{}': use toml or json", other),
    }

    Ok(())
}

fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?;
    config.set_value(key, value)?;
    config.save()?;
    println!("Set {} = {}", key, value);
    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    let paths = Paths::resolve()?;
    let path = paths.config_file();

    if path.exists() && !force {
        anyhow::bail!(
            "Config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let config = Config {
        paths,
        ..Config::default()
    };
    config.save_with_template()
}
