//! Pipeline orchestrator
//!
//! Drains the inbound stream and runs one task per message:
//!
//! ```text
//! inbound ─► [gate enter] ─► spawn ─► [gate wait] ─► context ─► completion ─► dispatch ─► [release]
//! ```
//!
//! The stream consumer never waits on the gate: in sequential mode it only
//! takes a ticket, which fixes the message's place in its conversation's queue
//! before the task is spawned.

use std::sync::Arc;

use futures::StreamExt;
use parley_ai::{CompletionRequest, LlmClient};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::channel::{ChatChannel, ChatMessage, InboundStream};
use crate::config::BotConfig;
use crate::context::ContextBuilder;
use crate::dispatch::ReplyDispatcher;
use crate::error::{PipelineError, Result};
use crate::gate::ConversationGate;
use crate::render::render_context;

/// Turns inbound messages into paced replies.
pub struct Pipeline {
    channel: Arc<dyn ChatChannel>,
    llm: Arc<dyn LlmClient>,
    config: Arc<BotConfig>,
    context_builder: ContextBuilder,
    dispatcher: ReplyDispatcher,
    gate: Option<ConversationGate>,
}

impl Pipeline {
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        llm: Arc<dyn LlmClient>,
        config: Arc<BotConfig>,
    ) -> Self {
        let gate = config
            .sequential_chat_processing
            .then(ConversationGate::new);
        Self {
            channel,
            llm,
            context_builder: ContextBuilder::from_config(&config),
            dispatcher: ReplyDispatcher::new(config.pacing()),
            gate,
            config,
        }
    }

    /// The per-conversation gate, present in sequential mode.
    pub fn gate(&self) -> Option<&ConversationGate> {
        self.gate.as_ref()
    }

    /// Build context, ask for a completion and deliver it.
    ///
    /// The conversation shows the typing indicator from context assembly until
    /// the last segment is sent or processing fails. Returns the number of
    /// segments sent.
    pub async fn process_message(&self, message: &ChatMessage) -> Result<usize> {
        let _composing = self
            .channel
            .open_composing_scope(&message.conversation_id);

        let context = self
            .context_builder
            .build(message, self.channel.as_ref())
            .await?;

        let messages = render_context(
            &self.config.system_prompt,
            &context,
            self.config.vision_enabled,
        );
        let mut request = CompletionRequest::new(messages);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.llm.complete(request).await?;
        debug!(
            conversation_id = %message.conversation_id,
            model = self.llm.model(),
            finish_reason = ?response.finish_reason,
            "Completion received"
        );

        let text = response.content.unwrap_or_default();
        self.dispatcher
            .deliver(&text, message, self.channel.as_ref())
            .await
    }

    async fn handle(&self, message: ChatMessage) {
        match self.process_message(&message).await {
            Ok(segments) => debug!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                segments,
                "Message processed"
            ),
            Err(e) => warn!(
                conversation_id = %message.conversation_id,
                message_id = %message.id,
                error = %e,
                "Message processing failed"
            ),
        }
    }

    fn spawn_message(self: &Arc<Self>, tasks: &mut JoinSet<()>, message: ChatMessage) {
        info!(
            channel = self.channel.name(),
            conversation_id = %message.conversation_id,
            message_id = %message.id,
            author = %message.author_name,
            "Inbound message"
        );

        // Taken here, in dequeue order, not inside the task
        let ticket = self
            .gate
            .as_ref()
            .map(|gate| gate.enter(&message.conversation_id));
        let pipeline = Arc::clone(self);

        tasks.spawn(async move {
            let _pass = match ticket {
                Some(ticket) => Some(ticket.wait().await),
                None => None,
            };
            pipeline.handle(message).await;
        });
    }

    /// Consume `stream` until it ends or fails.
    ///
    /// Per-message failures are logged and never stop the loop. A stream error
    /// is fatal: in-flight messages are allowed to finish, then
    /// [`PipelineError::Source`] is returned.
    pub async fn run(self: Arc<Self>, mut stream: InboundStream) -> Result<()> {
        let mut tasks = JoinSet::new();

        let outcome = loop {
            tokio::select! {
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_task_exit(joined),
                next = stream.next() => match next {
                    Some(Ok(message)) => self.spawn_message(&mut tasks, message),
                    Some(Err(e)) => {
                        error!("Inbound stream failed: {:#}", e);
                        break Err(PipelineError::Source(format!("{e:#}")));
                    }
                    None => {
                        info!("Inbound stream ended");
                        break Ok(());
                    }
                },
            }
        };

        if !tasks.is_empty() {
            debug!(pending = tasks.len(), "Waiting for in-flight messages");
        }
        while let Some(joined) = tasks.join_next().await {
            log_task_exit(joined);
        }
        outcome
    }

    /// Start the channel's inbound stream and [`run`](Self::run) it.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let stream = self.channel.start_receiving().ok_or_else(|| {
            PipelineError::Source(format!("{} is already receiving", self.channel.name()))
        })?;
        info!(
            channel = self.channel.name(),
            sequential = self.gate.is_some(),
            "Pipeline started"
        );
        self.run(stream).await
    }
}

fn log_task_exit(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Message task panicked: {}", e);
        } else {
            debug!("Message task cancelled: {}", e);
        }
    }
}
