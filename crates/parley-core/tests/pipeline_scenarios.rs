//! End-to-end pipeline scenarios against the in-memory channel.

use std::sync::Arc;
use std::time::Duration;

use parley_ai::{MockLlmClient, MockStep};
use parley_core::channel::{ChatChannel, ChatMessage};
use parley_core::testkit::{ChannelEvent, MockChannel};
use parley_core::{BotConfig, Pipeline, PipelineError};

fn config(sequential: bool) -> BotConfig {
    BotConfig {
        sequential_chat_processing: sequential,
        inter_message_delay_ms: 0,
        ..BotConfig::default()
    }
}

fn message(id: &str, conversation_id: &str) -> ChatMessage {
    ChatMessage::new(id, conversation_id, "user-1", format!("@bot {id}")).with_author_name("Ann")
}

fn build(channel: &Arc<MockChannel>, llm: &Arc<MockLlmClient>, config: BotConfig) -> Arc<Pipeline> {
    Arc::new(Pipeline::new(channel.clone(), llm.clone(), Arc::new(config)))
}

async fn run_to_end(pipeline: &Arc<Pipeline>) -> parley_core::Result<()> {
    tokio::time::timeout(Duration::from_secs(10), pipeline.clone().start())
        .await
        .expect("pipeline did not finish")
}

fn replies_to(channel: &MockChannel) -> Vec<(String, Option<String>)> {
    channel
        .sent()
        .into_iter()
        .map(|m| (m.content, m.reply_to))
        .collect()
}

#[tokio::test]
async fn completion_failure_is_silent_and_next_message_still_answered() {
    let channel = Arc::new(MockChannel::new());
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![MockStep::error("provider down"), MockStep::text("second reply")],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("m1", "chan"));
    channel.inject(message("m2", "chan"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    assert_eq!(
        replies_to(&channel),
        vec![("second reply".to_string(), Some("m2".to_string()))]
    );
    assert_eq!(llm.requests().await.len(), 2);
}

#[tokio::test]
async fn sequential_mode_builds_next_context_after_previous_dispatch() {
    let channel = Arc::new(MockChannel::new().with_send_delay(10));
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::text("one=<|>=two").with_delay(50),
            MockStep::text("three"),
        ],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("m1", "chan"));
    channel.inject(message("m2", "chan"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    let events = channel.events();
    let first_dispatch_done = events
        .iter()
        .position(|e| matches!(e, ChannelEvent::ComposingClosed(_)))
        .unwrap();
    let second_fetch = events
        .iter()
        .position(|e| matches!(e, ChannelEvent::HistoryFetched { before, .. } if before == "m2"))
        .unwrap();
    assert!(second_fetch > first_dispatch_done, "{events:#?}");

    assert_eq!(
        replies_to(&channel),
        vec![
            ("one".to_string(), Some("m1".to_string())),
            ("two".to_string(), None),
            ("three".to_string(), Some("m2".to_string())),
        ]
    );
    assert_eq!(pipeline.gate().unwrap().active_keys(), 0);
}

#[tokio::test]
async fn sequential_mode_does_not_block_other_conversations() {
    let channel = Arc::new(MockChannel::new());
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::text("slow").with_delay(300),
            MockStep::text("fast"),
        ],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("a1", "chan-a"));
    channel.inject(message("b1", "chan-b"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    let sent = channel.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].conversation_id, "chan-b");
    assert_eq!(sent[1].conversation_id, "chan-a");
}

#[tokio::test]
async fn concurrent_mode_gives_no_ordering_within_conversation() {
    let channel = Arc::new(MockChannel::new());
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![
            MockStep::text("late").with_delay(300),
            MockStep::text("early"),
        ],
    ));
    let pipeline = build(&channel, &llm, config(false));

    channel.inject(message("m1", "chan"));
    channel.inject(message("m2", "chan"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    assert_eq!(
        replies_to(&channel),
        vec![
            ("early".to_string(), Some("m2".to_string())),
            ("late".to_string(), Some("m1".to_string())),
        ]
    );
    assert!(pipeline.gate().is_none());
}

#[tokio::test]
async fn source_error_stops_pipeline_after_in_flight_work() {
    let channel = Arc::new(MockChannel::new());
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text("before the outage").with_delay(50)],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("m1", "chan"));
    channel.inject_error("gateway lost");
    channel.inject(message("m3", "chan"));

    let err = run_to_end(&pipeline).await.unwrap_err();
    assert!(matches!(err, PipelineError::Source(ref reason) if reason.contains("gateway lost")));
    assert!(err.is_fatal());

    assert_eq!(
        replies_to(&channel),
        vec![("before the outage".to_string(), Some("m1".to_string()))]
    );
    assert_eq!(llm.requests().await.len(), 1);
}

#[tokio::test]
async fn history_failure_is_isolated_to_its_message() {
    let channel = Arc::new(MockChannel::new());
    channel.fail_history_for("chan-a");
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text("for b")],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("a1", "chan-a"));
    channel.inject(message("b1", "chan-b"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    assert_eq!(
        replies_to(&channel),
        vec![("for b".to_string(), Some("b1".to_string()))]
    );
    assert_eq!(llm.requests().await.len(), 1);
}

#[tokio::test]
async fn send_failure_aborts_only_current_reply() {
    let channel = Arc::new(MockChannel::new());
    channel.fail_send_at(1);
    let llm = Arc::new(MockLlmClient::from_steps(
        "mock",
        vec![MockStep::text("x=<|>=y"), MockStep::text("z")],
    ));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("m1", "chan"));
    channel.inject(message("m2", "chan"));
    channel.close_inbound();

    run_to_end(&pipeline).await.unwrap();

    assert_eq!(
        replies_to(&channel),
        vec![("z".to_string(), Some("m2".to_string()))]
    );
}

#[tokio::test]
async fn history_before_target_feeds_the_prompt() {
    let channel = Arc::new(MockChannel::new().with_history(
        "chan",
        vec![
            ChatMessage::new("h1", "chan", "user-2", "first").with_author_name("Ben"),
            ChatMessage::new("h2", "chan", "bot", "reply")
                .with_author_name("Parley")
                .own(),
        ],
    ));
    let llm = Arc::new(MockLlmClient::from_steps("mock", vec![MockStep::text("ok")]));
    let pipeline = build(&channel, &llm, config(true));

    channel.inject(message("m1", "chan"));
    channel.close_inbound();
    run_to_end(&pipeline).await.unwrap();

    let requests = llm.requests().await;
    let texts: Vec<String> = requests[0]
        .messages
        .iter()
        .map(|m| m.content.text())
        .collect();
    assert_eq!(texts[1..], ["Ben:first", "reply", "Ann:@bot m1"]);
}

#[tokio::test]
async fn stopping_the_channel_ends_the_pipeline() {
    let channel = Arc::new(MockChannel::new());
    let llm = Arc::new(MockLlmClient::new("mock"));
    let pipeline = build(&channel, &llm, config(true));

    let running = tokio::spawn(pipeline.clone().start());
    tokio::time::sleep(Duration::from_millis(20)).await;
    channel.stop().await.unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(outcome.is_ok());
    assert!(channel.is_stopped());
}
