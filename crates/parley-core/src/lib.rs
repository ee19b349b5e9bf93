//! Parley core: conversation-context assembly and reply dispatch.
//!
//! For every inbound chat message the [`pipeline::Pipeline`] builds a bounded,
//! author-grouped context window ([`context`]), optionally serializes work per
//! conversation ([`gate`]), asks the completion service for a reply and
//! delivers it as several paced messages ([`dispatch`]).

pub mod channel;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod pipeline;
pub mod render;
pub mod segment;
pub mod testkit;

pub use config::{ApiConfig, BotConfig, DiscordSettings, LoggingConfig, ParleyConfig};
pub use context::{Context, ContextBuilder, ContextGroup};
pub use dispatch::{PacingConfig, ReplyDispatcher};
pub use error::{PipelineError, Result};
pub use gate::{ConversationGate, GatePass, GateTicket};
pub use pipeline::Pipeline;
pub use segment::SEGMENT_DELIMITER;
