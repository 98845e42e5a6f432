use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use design_ide::cli::{self, Cli, Commands, load_config};

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config_file = cli.config.as_deref();

    match cli.command {
        // Config commands manage the file themselves; a broken file must not block them
        Commands::Config(args) => {
            init_logging(cli.verbose, "warn", false);
            cli::config::run(args, config_file)
        }
        Commands::Paths => {
            init_logging(cli.verbose, "warn", false);
            cli::paths::run(load_config(config_file).ok().as_ref())
        }
        Commands::Serve(args) => {
            let config = load_config(config_file)?;
            init_logging(cli.verbose, &config.logging.level, config.logging.json);
            cli::serve::run(args, config).await
        }
        Commands::Chat(args) => {
            let config = load_config(config_file)?;
            // Keep the REPL readable; --verbose or RUST_LOG still raise it
            init_logging(cli.verbose, "warn", config.logging.json);
            cli::chat::run(args, config).await
        }
        Commands::Project(args) => {
            let config = load_config(config_file)?;
            init_logging(cli.verbose, &config.logging.level, config.logging.json);
            cli::project::run(args, &config)
        }
    }
}

/// `--verbose` forces debug, otherwise `level`; RUST_LOG overrides both.
fn init_logging(verbose: bool, level: &str, json: bool) {
    let level = if verbose { "debug" } else { level };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
