use colored::Colorize;

pub fn handle_error(err: anyhow::Error) -> ! {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let msg = format!("{:#}", err).to_lowercase();

    if msg.contains("discord.token is not set") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Add a bot token to the [discord] table or export it:");
        eprintln!("  {} export DISCORD_BOT_TOKEN=<token>", "$".dimmed());
    }

    if msg.contains("cannot read") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Point parley at an existing configuration file:");
        eprintln!("  {} parley --config <path> check-config", "$".dimmed());
    }

    if msg.contains("connection refused") || msg.contains("network") {
        eprintln!("\n{}", "Suggestion:".yellow().bold());
        eprintln!("  Check your internet connection and try again.");
    }

    std::process::exit(1);
}
