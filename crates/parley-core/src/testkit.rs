//! Test utilities for deterministic pipeline tests.
//!
//! [`MockChannel`] is an in-memory chat platform: conversations are scripted
//! lists of messages, every interaction is appended to an event log, and
//! history and send failures can be injected.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::channel::{
    ChatChannel, ChatMessage, ComposingScope, HistoryProvider, InboundStream, MessageSource,
    OutboundMessage, ReplySender,
};

/// Author id used for messages the mock bot sends.
pub const MOCK_BOT_ID: &str = "mock-bot";

/// One observable interaction with a [`MockChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    HistoryFetched {
        conversation_id: String,
        before: String,
    },
    Sent(OutboundMessage),
    ComposingOpened(String),
    ComposingClosed(String),
}

type InboundItem = Result<ChatMessage>;

/// In-memory chat platform for tests.
pub struct MockChannel {
    /// Per conversation, oldest first
    history: Mutex<HashMap<String, Vec<ChatMessage>>>,
    events: Arc<Mutex<Vec<ChannelEvent>>>,
    failing_history: Mutex<HashSet<String>>,
    fail_send_at: Mutex<Option<usize>>,
    send_attempts: AtomicUsize,
    send_delay_ms: u64,
    inbound_tx: Mutex<Option<mpsc::UnboundedSender<InboundItem>>>,
    inbound_rx: Mutex<Option<mpsc::UnboundedReceiver<InboundItem>>>,
    stopped: AtomicBool,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            history: Mutex::new(HashMap::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            failing_history: Mutex::new(HashSet::new()),
            fail_send_at: Mutex::new(None),
            send_attempts: AtomicUsize::new(0),
            send_delay_ms: 0,
            inbound_tx: Mutex::new(Some(tx)),
            inbound_rx: Mutex::new(Some(rx)),
            stopped: AtomicBool::new(false),
        }
    }

    /// Seed a conversation with messages, oldest first.
    pub fn with_history(self, conversation_id: &str, messages: Vec<ChatMessage>) -> Self {
        self.history
            .lock()
            .entry(conversation_id.to_string())
            .or_default()
            .extend(messages);
        self
    }

    /// Make every send take `delay_ms`.
    pub fn with_send_delay(mut self, delay_ms: u64) -> Self {
        self.send_delay_ms = delay_ms;
        self
    }

    /// Append a message to its conversation's history.
    pub fn push_history(&self, message: ChatMessage) {
        self.history
            .lock()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message);
    }

    /// Make history fetches for `conversation_id` fail.
    pub fn fail_history_for(&self, conversation_id: &str) {
        self.failing_history
            .lock()
            .insert(conversation_id.to_string());
    }

    /// Make the `n`-th send attempt (1-based, counted across conversations) fail.
    pub fn fail_send_at(&self, n: usize) {
        *self.fail_send_at.lock() = Some(n);
    }

    /// Deliver `message` on the inbound stream and record it in history.
    pub fn inject(&self, message: ChatMessage) {
        self.push_history(message.clone());
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Ok(message));
        }
    }

    /// Break the inbound stream with an error item.
    pub fn inject_error(&self, reason: &str) {
        if let Some(tx) = self.inbound_tx.lock().as_ref() {
            let _ = tx.send(Err(anyhow!("{}", reason)));
        }
    }

    /// End the inbound stream once queued items are consumed.
    pub fn close_inbound(&self) {
        self.inbound_tx.lock().take();
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().clone()
    }

    /// Messages sent so far, in send order.
    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ChannelEvent::Sent(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn record(&self, event: ChannelEvent) {
        self.events.lock().push(event);
    }
}

impl MessageSource for MockChannel {
    fn start_receiving(&self) -> Option<InboundStream> {
        let rx = self.inbound_rx.lock().take()?;
        Some(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

#[async_trait]
impl HistoryProvider for MockChannel {
    async fn fetch_history(&self, before: &ChatMessage, limit: usize) -> Result<Vec<ChatMessage>> {
        self.record(ChannelEvent::HistoryFetched {
            conversation_id: before.conversation_id.clone(),
            before: before.id.clone(),
        });

        if self
            .failing_history
            .lock()
            .contains(&before.conversation_id)
        {
            return Err(anyhow!(
                "mock history failure for {}",
                before.conversation_id
            ));
        }

        let history = self.history.lock();
        let Some(messages) = history.get(&before.conversation_id) else {
            return Ok(Vec::new());
        };
        let end = messages
            .iter()
            .position(|m| m.id == before.id)
            .unwrap_or(messages.len());

        Ok(messages[..end].iter().rev().take(limit).cloned().collect())
    }
}

#[async_trait]
impl ReplySender for MockChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let attempt = self.send_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.send_delay_ms > 0 {
            sleep(Duration::from_millis(self.send_delay_ms)).await;
        }

        if *self.fail_send_at.lock() == Some(attempt) {
            return Err(anyhow!("mock send failure at attempt {}", attempt));
        }

        self.push_history(
            ChatMessage::new(
                format!("sent-{attempt}"),
                &message.conversation_id,
                MOCK_BOT_ID,
                &message.content,
            )
            .with_author_name("Mock Bot")
            .own(),
        );
        self.record(ChannelEvent::Sent(message));
        Ok(())
    }

    fn open_composing_scope(&self, conversation_id: &str) -> ComposingScope {
        self.record(ChannelEvent::ComposingOpened(conversation_id.to_string()));

        let events = self.events.clone();
        let conversation_id = conversation_id.to_string();
        ComposingScope::inert().on_release(move || {
            events
                .lock()
                .push(ChannelEvent::ComposingClosed(conversation_id));
        })
    }
}

#[async_trait]
impl ChatChannel for MockChannel {
    fn name(&self) -> &str {
        "Mock"
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        self.close_inbound();
        Ok(())
    }
}
