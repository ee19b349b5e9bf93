//! Builds the runtime components from configuration.

use anyhow::{Context, Result};
use parley_ai::OpenAIClient;
use parley_core::channel::DiscordChannel;
use parley_core::{ParleyConfig, Pipeline};
use std::sync::Arc;
use std::time::Duration;

pub fn build_channel(config: &ParleyConfig) -> Result<Arc<DiscordChannel>> {
    let token = config
        .discord_token()
        .context("discord.token is not set")?;
    Ok(Arc::new(DiscordChannel::with_token(token)))
}

pub fn build_llm(config: &ParleyConfig) -> Arc<OpenAIClient> {
    Arc::new(
        OpenAIClient::new(config.api_key())
            .with_base_url(config.api.base_url.trim())
            .with_model(config.api.model.trim())
            .with_timeout(Duration::from_secs(config.api.timeout_secs)),
    )
}

pub fn build_pipeline(
    config: &ParleyConfig,
    channel: Arc<DiscordChannel>,
    llm: Arc<OpenAIClient>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(channel, llm, Arc::new(config.bot.clone())))
}
