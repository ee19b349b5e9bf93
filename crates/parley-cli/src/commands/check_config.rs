use anyhow::{Context, Result};
use colored::Colorize;
use parley_core::ParleyConfig;
use std::path::Path;

const MASK: &str = "********";

/// Print the effective configuration with secrets masked, then validate it.
pub fn run(config: &ParleyConfig, source: Option<&Path>) -> Result<()> {
    match source {
        Some(path) => println!("{} {}", "Config file:".bold(), path.display()),
        None => println!("{} none (built-in defaults)", "Config file:".bold()),
    }
    println!();
    println!("{}", render_masked(config)?);

    config.validate()?;
    println!("{}", "Configuration is valid.".green());
    Ok(())
}

fn render_masked(config: &ParleyConfig) -> Result<String> {
    let mut masked = config.clone();
    masked.api.key = masked.api.key.as_deref().map(mask_secret);
    masked.discord.token = masked.discord.token.as_deref().map(mask_secret);
    toml::to_string_pretty(&masked).context("Failed to render configuration")
}

fn mask_secret(secret: &str) -> String {
    let secret = secret.trim();
    if secret.chars().count() <= 8 {
        return MASK.to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{prefix}{MASK}")
}
