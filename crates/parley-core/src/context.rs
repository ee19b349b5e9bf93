//! Conversation context assembly
//!
//! Raw history is collapsed into author runs ("groups") so that a burst of
//! short messages from one person reads as a single turn, then bounded to a
//! fixed number of groups. The triggering message always stays separate.

use tracing::debug;

use crate::channel::{ChatMessage, HistoryProvider};
use crate::config::BotConfig;
use crate::error::{PipelineError, Result};
use crate::segment::{join_segments, split_exact};

/// Consecutive same-author messages merged into one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextGroup {
    pub author_id: String,
    pub author_name: String,
    pub is_own: bool,
    /// Member texts joined with [`SEGMENT_DELIMITER`](crate::SEGMENT_DELIMITER)
    pub text: String,
    pub member_count: usize,
    /// Image URLs of all members, in message order
    pub images: Vec<String>,
}

impl ContextGroup {
    /// Collapse a finished run; `None` for an empty run.
    fn from_run(run: Vec<ChatMessage>) -> Option<Self> {
        let first = run.first()?;
        let texts: Vec<&str> = run.iter().map(|m| m.text.as_str()).collect();
        Some(Self {
            author_id: first.author_id.clone(),
            author_name: first.author_name.clone(),
            is_own: first.is_own,
            text: join_segments(&texts),
            member_count: run.len(),
            images: run.iter().flat_map(|m| m.images.iter().cloned()).collect(),
        })
    }

    /// The original member texts, oldest first.
    pub fn members(&self) -> Vec<&str> {
        split_exact(&self.text)
    }
}

/// Bounded, chronological context for one triggering message.
#[derive(Debug, Clone)]
pub struct Context {
    /// Oldest first
    pub groups: Vec<ContextGroup>,
    /// The message being answered; never merged into `groups`
    pub target: ChatMessage,
}

impl Context {
    /// Groups plus the trailing target.
    pub fn entry_count(&self) -> usize {
        self.groups.len() + 1
    }
}

/// Builds a [`Context`] from platform history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBuilder {
    pub run_cap: usize,
    pub window_size: usize,
    pub history_limit: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::from_config(&BotConfig::default())
    }
}

impl ContextBuilder {
    pub fn new(run_cap: usize, window_size: usize, history_limit: usize) -> Self {
        Self {
            run_cap,
            window_size,
            history_limit,
        }
    }

    pub fn from_config(config: &BotConfig) -> Self {
        Self::new(
            config.group_run_cap,
            config.context_window_size,
            config.history_fetch_limit,
        )
    }

    /// Fetch history preceding `target` and assemble its context.
    pub async fn build<H>(&self, target: &ChatMessage, provider: &H) -> Result<Context>
    where
        H: HistoryProvider + ?Sized,
    {
        let mut history = if self.history_limit == 0 {
            Vec::new()
        } else {
            provider
                .fetch_history(target, self.history_limit)
                .await
                .map_err(|e| PipelineError::HistoryFetch {
                    conversation_id: target.conversation_id.clone(),
                    message: format!("{e:#}"),
                })?
        };

        // Providers return newest first
        history.truncate(self.history_limit);
        history.reverse();

        let context = self.assemble(target.clone(), history);
        debug!(
            conversation_id = %target.conversation_id,
            message_id = %target.id,
            groups = context.groups.len(),
            "Context assembled"
        );
        Ok(context)
    }

    /// Group `history` (oldest first) and append `target`.
    pub fn assemble<I>(&self, target: ChatMessage, history: I) -> Context
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        let mut groups: Vec<ContextGroup> = Vec::new();
        let mut run: Vec<ChatMessage> = Vec::new();
        for message in history {
            let author_changed = run
                .first()
                .is_some_and(|first| first.author_id != message.author_id);
            if author_changed || run.len() >= self.run_cap {
                groups.extend(ContextGroup::from_run(std::mem::take(&mut run)));
            }
            run.push(message);
        }
        groups.extend(ContextGroup::from_run(run));

        let overflow = groups.len().saturating_sub(self.window_size);
        groups.drain(..overflow);

        Context { groups, target }
    }
}
