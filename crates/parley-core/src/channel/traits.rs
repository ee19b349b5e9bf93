//! Channel Trait Definitions
//!
//! A chat platform is described by three capabilities, each its own trait so
//! pipeline stages only see what they use:
//!
//! - [`MessageSource`]: the inbound message stream
//! - [`HistoryProvider`]: earlier messages of a conversation
//! - [`ReplySender`]: outbound messages and the "typing" indicator
//!
//! [`ChatChannel`] bundles them with lifecycle control; the bot picks one
//! implementation per platform at startup.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use tokio::task::JoinHandle;

use super::types::{ChatMessage, OutboundMessage};

/// Inbound messages; an `Err` item means the source itself broke.
pub type InboundStream = Pin<Box<dyn Stream<Item = Result<ChatMessage>> + Send>>;

/// Produces the inbound message stream
pub trait MessageSource: Send + Sync {
    /// Start receiving messages (returns None if already receiving)
    ///
    /// The stream is fed by a background task and can be drained once.
    fn start_receiving(&self) -> Option<InboundStream>;
}

/// Fetches earlier messages of one conversation
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Up to `limit` messages strictly before `before`, newest first.
    async fn fetch_history(&self, before: &ChatMessage, limit: usize) -> Result<Vec<ChatMessage>>;
}

/// Delivers outbound messages
#[async_trait]
pub trait ReplySender: Send + Sync {
    /// Send one message (threaded when `message.reply_to` is set)
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Show a "typing" indicator in `conversation_id` until the scope drops.
    ///
    /// Platforms without an indicator return an inert scope.
    fn open_composing_scope(&self, conversation_id: &str) -> ComposingScope {
        let _ = conversation_id;
        ComposingScope::inert()
    }
}

/// Full chat platform capability set
#[async_trait]
pub trait ChatChannel: MessageSource + HistoryProvider + ReplySender {
    /// Platform display name
    fn name(&self) -> &str;

    /// Check if channel is properly configured
    fn is_configured(&self) -> bool;

    /// Stop receiving and close the platform connection
    async fn stop(&self) -> Result<()>;
}

/// RAII handle for a "typing" indicator.
///
/// Dropping the scope stops the refresh task and runs the release hook, so
/// the indicator is released on success, on error and on task cancellation.
#[must_use = "the indicator is released as soon as the scope is dropped"]
#[derive(Default)]
pub struct ComposingScope {
    refresh: Option<JoinHandle<()>>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl ComposingScope {
    /// A scope that does nothing.
    pub fn inert() -> Self {
        Self::default()
    }

    /// A scope kept alive by a background refresh task.
    pub fn with_refresh_task(refresh: JoinHandle<()>) -> Self {
        Self {
            refresh: Some(refresh),
            on_release: None,
        }
    }

    /// Run `hook` when the scope is released.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }
}

impl Drop for ComposingScope {
    fn drop(&mut self) {
        if let Some(refresh) = self.refresh.take() {
            refresh.abort();
        }
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}
