//! Chat Platform Channel Layer
//!
//! Platform-agnostic message types and capability traits, plus the platform
//! implementations the bot can run on.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │               Pipeline                  │
//! └─────────────────────────────────────────┘
//!      │ stream        │ history      │ send / typing
//!      ▼               ▼              ▼
//! MessageSource  HistoryProvider  ReplySender
//!      └───────────────┼──────────────┘
//!                      ▼
//!             trait ChatChannel
//!                      │
//!                      ▼
//!                   Discord
//! ```

mod chunk;
pub mod discord;
mod traits;
mod types;

pub use chunk::chunk_message;
pub use discord::{DiscordChannel, DiscordConfig};
pub use traits::{
    ChatChannel, ComposingScope, HistoryProvider, InboundStream, MessageSource, ReplySender,
};
pub use types::{ChatMessage, OutboundMessage};
