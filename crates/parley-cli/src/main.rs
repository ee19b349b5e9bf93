mod cli;
mod commands;
mod config;
mod error;
mod logging;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error::handle_error(err);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let (config, source) = config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::CheckConfig => commands::check_config::run(&config, source.as_deref()),
        Commands::Run => {
            let _guard = logging::init(cli.verbose, &config.logging)?;
            commands::run::run(config).await
        }
    }
}
