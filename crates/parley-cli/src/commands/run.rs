use anyhow::{Context, Result};
use parley_core::ParleyConfig;
use parley_core::channel::ChatChannel;
use tracing::{info, warn};

use crate::setup::{build_channel, build_llm, build_pipeline};

/// Run the bot until the inbound stream fails or Ctrl-C is pressed.
pub async fn run(config: ParleyConfig) -> Result<()> {
    config.validate()?;

    let channel = build_channel(&config)?;
    let llm = build_llm(&config);
    if config.api_key().is_empty() {
        warn!("No API key configured; requests are sent without authorization");
    }

    info!(
        model = %config.api.model,
        base_url = %config.api.base_url,
        sequential = config.bot.sequential_chat_processing,
        vision = config.bot.vision_enabled,
        "Starting parley"
    );

    let pipeline = build_pipeline(&config, channel.clone(), llm);

    let outcome = tokio::select! {
        result = pipeline.start() => result.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            Ok(())
        }
    };

    channel.stop().await?;
    outcome
}
