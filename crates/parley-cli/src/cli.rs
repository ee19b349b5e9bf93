use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about = "Parley - group chat companion bot")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ~/.config/parley/config.toml)
    #[arg(long, short, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Connect to Discord and answer mentions (default)
    Run,

    /// Validate the configuration and print the effective settings
    CheckConfig,
}
