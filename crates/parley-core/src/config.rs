//! Bot configuration
//!
//! Loaded once at startup from a TOML file and shared read-only with every
//! component.
//!
//! ```toml
//! [bot]
//! system_prompt = "You are a friendly regular in this server."
//! sequential_chat_processing = true
//! simulate_typing = true
//! typing_chars_per_minute = 600.0
//!
//! [api]
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//!
//! [discord]
//! token = "..."
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dispatch::PacingConfig;
use crate::error::{PipelineError, Result};
use crate::segment::SEGMENT_DELIMITER;

pub const API_KEY_ENV: &str = "PARLEY_API_KEY";
pub const DISCORD_TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub discord: DiscordSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options consumed by the message pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Prompt sent as the first (system) message of every completion request
    pub system_prompt: String,
    /// Serialize processing of messages that share a conversation
    pub sequential_chat_processing: bool,
    /// Wait proportionally to segment length before each send
    pub simulate_typing: bool,
    pub typing_chars_per_minute: f64,
    /// Fixed pause before every send
    pub inter_message_delay_ms: u64,
    /// Attach image references to rendered context
    pub vision_enabled: bool,
    /// Maximum number of consecutive same-author messages merged into one group
    pub group_run_cap: usize,
    /// Maximum number of groups kept before the triggering message
    pub context_window_size: usize,
    /// Raw history messages requested from the platform per inbound message
    pub history_fetch_limit: usize,
    /// Sampling temperature; provider default when unset
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            system_prompt: format!(
                "You are a friendly member of a group chat. Keep replies short. \
                 To send several separate chat messages, put {} between them.",
                SEGMENT_DELIMITER
            ),
            sequential_chat_processing: true,
            simulate_typing: false,
            typing_chars_per_minute: 600.0,
            inter_message_delay_ms: 1000,
            vision_enabled: false,
            group_run_cap: 5,
            context_window_size: 10,
            history_fetch_limit: 25,
            temperature: None,
            max_tokens: None,
        }
    }
}

impl BotConfig {
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig {
            simulate_typing: self.simulate_typing,
            typing_chars_per_minute: self.typing_chars_per_minute,
            inter_message_delay: Duration::from_millis(self.inter_message_delay_ms),
        }
    }
}

/// Completion service connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
        }
    }
}

/// Discord connection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSettings {
    pub token: Option<String>,
}

/// Log output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; stderr only when unset
    pub dir: Option<PathBuf>,
    /// Default filter directive when `RUST_LOG` is not set
    pub level: Option<String>,
}

impl ParleyConfig {
    /// Load and parse a configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Let secrets from the environment take precedence over the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(API_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.api.key = Some(key.trim().to_string());
        }
        if let Some(token) = lookup(DISCORD_TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
            self.discord.token = Some(token.trim().to_string());
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let bot = &self.bot;
        if bot.group_run_cap == 0 {
            return Err(PipelineError::Config(
                "bot.group_run_cap must be at least 1".into(),
            ));
        }
        if bot.context_window_size == 0 {
            return Err(PipelineError::Config(
                "bot.context_window_size must be at least 1".into(),
            ));
        }
        if bot.history_fetch_limit == 0 {
            return Err(PipelineError::Config(
                "bot.history_fetch_limit must be at least 1".into(),
            ));
        }
        if bot.simulate_typing
            && !(bot.typing_chars_per_minute.is_finite() && bot.typing_chars_per_minute > 0.0)
        {
            return Err(PipelineError::Config(
                "bot.typing_chars_per_minute must be positive when simulate_typing is on".into(),
            ));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(PipelineError::Config("api.base_url is empty".into()));
        }
        if self.api.model.trim().is_empty() {
            return Err(PipelineError::Config("api.model is empty".into()));
        }
        if self.discord_token().is_none() {
            return Err(PipelineError::Config(format!(
                "discord.token is not set (or export {})",
                DISCORD_TOKEN_ENV
            )));
        }
        Ok(())
    }

    pub fn discord_token(&self) -> Option<&str> {
        self.discord
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn api_key(&self) -> &str {
        self.api.key.as_deref().map(str::trim).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> ParleyConfig {
        let mut config = ParleyConfig::default();
        config.discord.token = Some("token".to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.group_run_cap, 5);
        assert_eq!(config.context_window_size, 10);
        assert_eq!(config.history_fetch_limit, 25);
        assert_eq!(config.inter_message_delay_ms, 1000);
        assert!(config.system_prompt.contains(SEGMENT_DELIMITER));
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let config = ParleyConfig::from_toml_str(
            r#"
            [bot]
            simulate_typing = true
            typing_chars_per_minute = 1200.0
            vision_enabled = true

            [api]
            model = "local-model"
            base_url = "http://localhost:8000/v1"
            "#,
        )
        .unwrap();

        assert!(config.bot.simulate_typing);
        assert_eq!(config.bot.typing_chars_per_minute, 1200.0);
        assert!(config.bot.vision_enabled);
        assert_eq!(config.bot.group_run_cap, 5);
        assert_eq!(config.api.model, "local-model");
        assert_eq!(config.api.timeout_secs, 120);
        assert!(config.discord.token.is_none());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[discord]\ntoken = \"abc\"\n[bot]\ngroup_run_cap = 3").unwrap();

        let config = ParleyConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.discord_token(), Some("abc"));
        assert_eq!(config.bot.group_run_cap, 3);
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ParleyConfig::load_from_path(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bot\nsimulate_typing = ").unwrap();

        let err = ParleyConfig::load_from_path(file.path()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_env_overrides_win() {
        let mut config = ParleyConfig::default();
        config.api.key = Some("from-file".into());
        config.apply_overrides_from(|name| match name {
            API_KEY_ENV => Some(" from-env ".to_string()),
            DISCORD_TOKEN_ENV => Some("tok".to_string()),
            _ => None,
        });

        assert_eq!(config.api_key(), "from-env");
        assert_eq!(config.discord_token(), Some("tok"));
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = ParleyConfig::default();
        config.api.key = Some("from-file".into());
        config.apply_overrides_from(|_| Some("   ".to_string()));
        assert_eq!(config.api_key(), "from-file");
        assert!(config.discord_token().is_none());
    }

    #[test]
    fn test_validate_accepts_defaults_with_token() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = valid_config();
        config.bot.group_run_cap = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.bot.context_window_size = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.bot.simulate_typing = true;
        config.bot.typing_chars_per_minute = 0.0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.api.model = " ".into();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.discord.token = Some("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_typing_speed_allowed_without_simulation() {
        let mut config = valid_config();
        config.bot.typing_chars_per_minute = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pacing_from_config() {
        let mut config = BotConfig::default();
        config.simulate_typing = true;
        config.inter_message_delay_ms = 250;
        let pacing = config.pacing();
        assert!(pacing.simulate_typing);
        assert_eq!(pacing.inter_message_delay, Duration::from_millis(250));
    }
}
