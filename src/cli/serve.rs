use anyhow::Result;
use clap::Args;

use crate::config::Config;
use crate::server::Server;

#[derive(Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,
}

pub async fn run(args: ServeArgs, mut config: Config) -> Result<()> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let server = Server::new(&config)?;
    println!(
        "Design IDE v{} | Model: {} | Store: {}",
        env!("CARGO_PKG_VERSION"),
        config.agent.default_model,
        config.database_path().display()
    );
    server.run().await
}
