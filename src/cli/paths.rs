//! CLI subcommand: `design-ide paths`
//!
//! Prints all resolved XDG-compliant paths for debugging and scripting.

use anyhow::Result;

use crate::config::Config;

pub fn run(config: Option<&Config>) -> Result<()> {
    let paths = match config {
        Some(config) => config.paths.clone(),
        None => crate::paths::Paths::resolve()?,
    };

    println!("Design IDE Paths (XDG Base Directory)");
    println!("=====================================");
    println!();
    println!("Config:     {}", paths.config_dir.display());
    println!("  config.toml:    {}", paths.config_file().display());
    println!();
    println!("Data:       {}", paths.data_dir.display());
    match config {
        Some(config) => println!("  database:       {}", config.database_path().display()),
        None => println!("  database:       {}", paths.database().display()),
    }
    println!();
    println!("State:      {}", paths.state_dir.display());
    println!("  chat history:   {}", paths.chat_history().display());
    println!("  logs:           {}", paths.logs_dir().display());
    println!();
    println!("Exports:    {}", paths.export_dir.display());

    Ok(())
}
