//! Reply dispatch
//!
//! Splits one completion into chat-sized segments and delivers them in order:
//! the first as a threaded reply to the triggering message, the rest as plain
//! follow-ups, each preceded by a pause that imitates a person typing.

use std::time::Duration;

use tracing::{debug, info};

use crate::channel::{ChatMessage, OutboundMessage, ReplySender};
use crate::error::{PipelineError, Result};
use crate::segment::split_segments;

/// Delays applied before each outbound segment.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    /// Wait proportionally to segment length
    pub simulate_typing: bool,
    pub typing_chars_per_minute: f64,
    /// Fixed pause before every send, including the first
    pub inter_message_delay: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            simulate_typing: false,
            typing_chars_per_minute: 600.0,
            inter_message_delay: Duration::from_secs(1),
        }
    }
}

impl PacingConfig {
    /// No delays at all.
    pub fn immediate() -> Self {
        Self {
            simulate_typing: false,
            inter_message_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Simulated composition time for `segment`.
    pub fn typing_delay(&self, segment: &str) -> Duration {
        let cpm = self.typing_chars_per_minute;
        if !self.simulate_typing || !cpm.is_finite() || cpm <= 0.0 {
            return Duration::ZERO;
        }
        let chars = segment.chars().count() as f64;
        Duration::try_from_secs_f64(chars / (cpm / 60.0)).unwrap_or_default()
    }

    /// Total pause before sending `segment`.
    pub fn delay_for(&self, segment: &str) -> Duration {
        self.typing_delay(segment) + self.inter_message_delay
    }
}

/// Delivers completions as paced, ordered message sequences.
#[derive(Debug, Clone, Default)]
pub struct ReplyDispatcher {
    pacing: PacingConfig,
}

impl ReplyDispatcher {
    pub fn new(pacing: PacingConfig) -> Self {
        Self { pacing }
    }

    pub fn pacing(&self) -> &PacingConfig {
        &self.pacing
    }

    /// Send `raw_text` in response to `target`, returning the number of
    /// segments delivered.
    ///
    /// Stops at the first failed send; segments after it are not attempted.
    /// The typing indicator is held from before the first pause until the
    /// last send finishes or fails.
    pub async fn dispatch<S>(&self, raw_text: &str, target: &ChatMessage, sender: &S) -> Result<usize>
    where
        S: ReplySender + ?Sized,
    {
        if split_segments(raw_text).is_empty() {
            debug!(
                conversation_id = %target.conversation_id,
                "Completion is empty, nothing to send"
            );
            return Ok(0);
        }

        let _composing = sender.open_composing_scope(&target.conversation_id);
        self.deliver(raw_text, target, sender).await
    }

    /// Like [`dispatch`](Self::dispatch), for a caller that already holds the
    /// conversation's composing scope.
    pub async fn deliver<S>(&self, raw_text: &str, target: &ChatMessage, sender: &S) -> Result<usize>
    where
        S: ReplySender + ?Sized,
    {
        let segments = split_segments(raw_text);
        if segments.is_empty() {
            return Ok(0);
        }

        for (index, segment) in segments.iter().enumerate() {
            let delay = self.pacing.delay_for(segment);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let message = if index == 0 {
                OutboundMessage::reply(target, *segment)
            } else {
                OutboundMessage::follow_up(target, *segment)
            };

            sender
                .send(message)
                .await
                .map_err(|e| PipelineError::Send {
                    conversation_id: target.conversation_id.clone(),
                    segment: index + 1,
                    message: format!("{e:#}"),
                })?;
            debug!(
                conversation_id = %target.conversation_id,
                segment = index + 1,
                total = segments.len(),
                "Segment sent"
            );
        }

        info!(
            conversation_id = %target.conversation_id,
            reply_to = %target.id,
            segments = segments.len(),
            "Reply dispatched"
        );
        Ok(segments.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{ChannelEvent, MockChannel};

    fn target() -> ChatMessage {
        ChatMessage::new("m-1", "chan", "user-1", "hi bot")
    }

    fn immediate() -> ReplyDispatcher {
        ReplyDispatcher::new(PacingConfig::immediate())
    }

    #[tokio::test]
    async fn test_two_segments_reply_then_follow_up() {
        let channel = MockChannel::new();
        let sent = immediate()
            .dispatch("Hello=<|>=World", &target(), &channel)
            .await
            .unwrap();

        assert_eq!(sent, 2);
        let sent = channel.sent();
        assert_eq!(sent[0].content, "Hello");
        assert_eq!(sent[0].reply_to.as_deref(), Some("m-1"));
        assert_eq!(sent[1].content, "World");
        assert!(!sent[1].is_reply());
        assert!(sent.iter().all(|m| m.conversation_id == "chan"));
    }

    #[tokio::test]
    async fn test_no_delimiter_is_single_threaded_reply() {
        let channel = MockChannel::new();
        let sent = immediate()
            .dispatch("  just one thought  ", &target(), &channel)
            .await
            .unwrap();

        assert_eq!(sent, 1);
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "just one thought");
        assert!(sent[0].is_reply());
    }

    #[tokio::test]
    async fn test_empty_completion_sends_nothing() {
        let channel = MockChannel::new();
        for raw in ["", "   \n ", "=<|>=", " =<|>= \n =<|>= "] {
            let sent = immediate().dispatch(raw, &target(), &channel).await.unwrap();
            assert_eq!(sent, 0);
        }
        assert!(channel.events().is_empty());
    }

    #[tokio::test]
    async fn test_empty_segments_between_delimiters_dropped() {
        let channel = MockChannel::new();
        immediate()
            .dispatch("=<|>=a=<|>= =<|>=b=<|>=", &target(), &channel)
            .await
            .unwrap();

        let contents: Vec<String> = channel.sent().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_send_failure_aborts_remaining_segments() {
        let channel = MockChannel::new();
        channel.fail_send_at(2);

        let err = immediate()
            .dispatch("one=<|>=two=<|>=three", &target(), &channel)
            .await
            .unwrap_err();

        match err {
            PipelineError::Send {
                conversation_id,
                segment,
                ..
            } => {
                assert_eq!(conversation_id, "chan");
                assert_eq!(segment, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        let contents: Vec<String> = channel.sent().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["one"]);
        assert_eq!(
            channel.events().last(),
            Some(&ChannelEvent::ComposingClosed("chan".into()))
        );
    }

    #[tokio::test]
    async fn test_composing_scope_spans_all_sends() {
        let channel = MockChannel::new();
        immediate()
            .dispatch("a=<|>=b", &target(), &channel)
            .await
            .unwrap();

        let events = channel.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ChannelEvent::ComposingOpened("chan".into()));
        assert!(matches!(events[1], ChannelEvent::Sent(_)));
        assert!(matches!(events[2], ChannelEvent::Sent(_)));
        assert_eq!(events[3], ChannelEvent::ComposingClosed("chan".into()));
    }

    #[tokio::test]
    async fn test_deliver_leaves_scope_to_caller() {
        let channel = MockChannel::new();
        immediate()
            .deliver("a=<|>=b", &target(), &channel)
            .await
            .unwrap();

        let events = channel.events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, ChannelEvent::Sent(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_with_simulated_typing() {
        let channel = MockChannel::new();
        let dispatcher = ReplyDispatcher::new(PacingConfig {
            simulate_typing: true,
            typing_chars_per_minute: 600.0,
            inter_message_delay: Duration::from_secs(1),
        });

        let start = tokio::time::Instant::now();
        // 5 chars at 10 chars/s, then 10 chars
        dispatcher
            .dispatch("Hello=<|>=World!!!!!", &target(), &channel)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(3500), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(3600), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_without_simulated_typing() {
        let channel = MockChannel::new();
        let dispatcher = ReplyDispatcher::new(PacingConfig {
            simulate_typing: false,
            typing_chars_per_minute: 600.0,
            inter_message_delay: Duration::from_secs(1),
        });

        let start = tokio::time::Instant::now();
        dispatcher
            .dispatch("a long first message=<|>=b", &target(), &channel)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "{elapsed:?}");
    }

    #[test]
    fn test_typing_delay_counts_characters() {
        let pacing = PacingConfig {
            simulate_typing: true,
            typing_chars_per_minute: 60.0,
            inter_message_delay: Duration::from_millis(250),
        };
        assert_eq!(pacing.typing_delay("héllo"), Duration::from_secs(5));
        assert_eq!(pacing.delay_for("héllo"), Duration::from_millis(5250));
    }

    #[test]
    fn test_typing_delay_ignores_unusable_speed() {
        for cpm in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let pacing = PacingConfig {
                simulate_typing: true,
                typing_chars_per_minute: cpm,
                inter_message_delay: Duration::from_secs(1),
            };
            assert_eq!(pacing.delay_for("abc"), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_typing_disabled_uses_fixed_delay_only() {
        let pacing = PacingConfig::default();
        assert_eq!(pacing.delay_for("whatever"), Duration::from_secs(1));
        assert_eq!(PacingConfig::immediate().delay_for("x"), Duration::ZERO);
    }
}
