//! Discord channel implementation.
//!
//! Uses the Discord Gateway WebSocket for receiving messages and the REST API
//! for history, sending and the typing indicator.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::stream::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::chunk::chunk_message;
use super::traits::{
    ChatChannel, ComposingScope, HistoryProvider, InboundStream, MessageSource, ReplySender,
};
use super::types::{ChatMessage, OutboundMessage};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const DISCORD_MAX_MESSAGE_LEN: usize = 2000;
/// Discord caps `GET /channels/{id}/messages` at 100 per page.
const DISCORD_MAX_HISTORY_PAGE: usize = 100;
/// The typing indicator lasts ~10 seconds per trigger.
const TYPING_REFRESH: Duration = Duration::from_secs(8);
const DEFAULT_HEARTBEAT_MS: u64 = 41250;

#[cfg(test)]
const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(20);
#[cfg(not(test))]
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);
/// Consecutive failed sessions before the gateway gives up.
const MAX_RECONNECT_ATTEMPTS: u32 = 8;
/// Close codes after which a new session cannot succeed: authentication
/// failed, invalid shard, sharding required, invalid API version, invalid
/// or disallowed intents.
const FATAL_CLOSE_CODES: [u16; 6] = [4004, 4010, 4011, 4012, 4013, 4014];

/// Intents: GUILDS (1) | GUILD_MESSAGES (512) | DIRECT_MESSAGES (4096) | MESSAGE_CONTENT (32768)
const GATEWAY_INTENTS: u64 = 1 | 512 | 4096 | 32768;

/// Discord channel configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub api_base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct BotUser {
    id: String,
    name: String,
}

/// Discord channel that receives via Gateway WebSocket and talks REST otherwise.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
    polling: Arc<AtomicBool>,
    bot_user: Arc<RwLock<Option<BotUser>>>,
    shutdown: Mutex<CancellationToken>,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            client: Client::new(),
            polling: Arc::new(AtomicBool::new(false)),
            bot_user: Arc::new(RwLock::new(None)),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn with_token(token: &str) -> Self {
        Self::new(DiscordConfig {
            bot_token: token.to_string(),
            api_base: DISCORD_API_BASE.to_string(),
        })
    }

    /// Point REST calls at another base URL.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.config.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.bot_token)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base, path)
    }

    /// The bot's own user, from the gateway READY event or `GET /users/@me`.
    async fn bot_user(&self) -> Result<BotUser> {
        if let Some(user) = self.bot_user.read().clone() {
            return Ok(user);
        }

        let resp = self
            .client
            .get(self.api_url("/users/@me"))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Failed to query Discord bot user")?;
        if !resp.status().is_success() {
            bail!("Discord /users/@me failed ({})", resp.status());
        }

        let body: Value = resp.json().await?;
        let user = parse_user(&body).ok_or_else(|| anyhow!("Malformed Discord user object"))?;
        *self.bot_user.write() = Some(user.clone());
        Ok(user)
    }

    /// Send a message to a Discord channel via REST API.
    ///
    /// Text over Discord's length limit goes out as several messages; only the
    /// first one carries the reply reference.
    async fn send_message(&self, message: &OutboundMessage) -> Result<()> {
        let url = self.api_url(&format!("/channels/{}/messages", message.conversation_id));
        let chunks = chunk_message(&message.content, DISCORD_MAX_MESSAGE_LEN);

        for (index, chunk) in chunks.iter().enumerate() {
            let mut body = json!({
                "content": chunk,
                "allowed_mentions": { "parse": [], "replied_user": false },
            });
            if index == 0
                && let Some(reply_to) = &message.reply_to
            {
                body["message_reference"] = json!({
                    "message_id": reply_to,
                    "channel_id": message.conversation_id,
                    "fail_if_not_exists": false,
                });
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", self.auth_header())
                .json(&body)
                .send()
                .await
                .context("Discord send request failed")?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                bail!("Discord send failed ({}): {}", status, body);
            }
        }
        Ok(())
    }

    /// Start the Gateway WebSocket connection and return a message stream.
    fn start_gateway(&self) -> Option<InboundStream> {
        let token = self.config.bot_token.clone();
        let gateway_base = self.config.api_base.clone();
        let client = self.client.clone();
        let polling = self.polling.clone();
        let bot_user = self.bot_user.clone();

        if polling.swap(true, Ordering::SeqCst) {
            warn!("Discord gateway already running");
            return None;
        }

        let shutdown = CancellationToken::new();
        *self.shutdown.lock() = shutdown.clone();

        let (tx, rx) = mpsc::channel::<Result<ChatMessage>>(256);

        tokio::spawn(async move {
            let _guard = scopeguard::guard(polling, |polling| {
                polling.store(false, Ordering::SeqCst);
            });

            let outcome =
                run_gateway(&client, &gateway_base, &token, &bot_user, &tx, &shutdown).await;

            match outcome {
                Ok(()) => info!("Discord gateway connection ended"),
                Err(e) if shutdown.is_cancelled() => {
                    debug!("Discord gateway stopped: {:#}", e)
                }
                Err(e) => {
                    error!("Discord gateway failed: {:#}", e);
                    let _ = tx.send(Err(e)).await;
                }
            }
        });

        Some(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn fetch_gateway_url(client: &Client, api_base: &str, token: &str) -> Result<String> {
        let resp = client
            .get(format!("{}/gateway/bot", api_base))
            .header("Authorization", format!("Bot {}", token))
            .send()
            .await
            .context("Failed to get Discord gateway URL")?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TokenRejected(status).into());
        }
        if !status.is_success() {
            bail!("Discord /gateway/bot failed ({})", status);
        }

        let body: Value = resp.json().await?;
        let url = body["url"]
            .as_str()
            .context("Missing 'url' in gateway response")?;
        Ok(format!("{}/?v=10&encoding=json", url))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Discord rejected the bot token ({0})")]
struct TokenRejected(StatusCode);

/// How a gateway session ended when it did not simply lose its connection.
#[derive(Debug)]
enum SessionEnd {
    /// Shutdown was requested or the inbound stream was dropped.
    Stopped,
    /// Discord asked for a fresh session (op 7 or op 9).
    Reconnect(&'static str),
    /// Discord refused the session for good.
    Fatal(anyhow::Error),
}

/// Keep the gateway connected until shutdown.
///
/// Reconnect requests, invalidated sessions and dropped sockets start a new
/// session. Returns `Err` only when no new session can succeed: a fatal close
/// code, or [`MAX_RECONNECT_ATTEMPTS`] failed sessions in a row.
async fn run_gateway(
    client: &Client,
    api_base: &str,
    token: &str,
    bot_user: &RwLock<Option<BotUser>>,
    tx: &mpsc::Sender<Result<ChatMessage>>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut failures: u32 = 0;

    loop {
        if shutdown.is_cancelled() {
            return Ok(());
        }

        let mut ready = false;
        let outcome =
            run_session(client, api_base, token, bot_user, tx, shutdown, &mut ready).await;
        if ready {
            failures = 0;
        }

        let cause = match outcome {
            Ok(SessionEnd::Stopped) => return Ok(()),
            Ok(SessionEnd::Fatal(e)) => return Err(e),
            Ok(SessionEnd::Reconnect(reason)) if ready => {
                info!("Discord Gateway {}, reconnecting", reason);
                continue;
            }
            // A session that never got READY counts as failed
            Ok(SessionEnd::Reconnect(reason)) => anyhow!("Discord Gateway {}", reason),
            Err(e) => e,
        };

        failures += 1;
        if failures >= MAX_RECONNECT_ATTEMPTS {
            return Err(cause.context(format!(
                "Discord Gateway unavailable after {} attempts",
                failures
            )));
        }

        let delay = reconnect_delay(failures);
        warn!(
            "Discord Gateway connection lost: {:#}; reconnecting in {:?}",
            cause, delay
        );
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Exponential backoff for the `failures`-th consecutive failed session.
fn reconnect_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    RECONNECT_BASE_DELAY
        .saturating_mul(1 << exponent)
        .min(RECONNECT_MAX_DELAY)
}

/// Drive one gateway session: connect, Identify, then forward events.
///
/// `Err` means the connection was lost and another session may succeed.
/// `ready` is set once Discord accepts the Identify.
async fn run_session(
    client: &Client,
    api_base: &str,
    token: &str,
    bot_user: &RwLock<Option<BotUser>>,
    tx: &mpsc::Sender<Result<ChatMessage>>,
    shutdown: &CancellationToken,
    ready: &mut bool,
) -> Result<SessionEnd> {
    use futures::SinkExt;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    let gateway_url = match DiscordChannel::fetch_gateway_url(client, api_base, token).await {
        Ok(url) => url,
        Err(e) if e.is::<TokenRejected>() => return Ok(SessionEnd::Fatal(e)),
        Err(e) => return Err(e),
    };
    info!("Connecting to Discord Gateway: {}", gateway_url);

    let (ws_stream, _) = tokio_tungstenite::connect_async(&gateway_url)
        .await
        .context("Failed to connect to Discord Gateway")?;
    let (ws_write, mut ws_read) = ws_stream.split();

    // Read Hello (opcode 10) to get heartbeat interval
    let heartbeat_interval = match ws_read.next().await {
        Some(Ok(msg)) => {
            let payload: Value = serde_json::from_str(msg.to_text().unwrap_or("{}"))
                .unwrap_or_default();
            if payload["op"].as_u64() == Some(10) {
                payload["d"]["heartbeat_interval"]
                    .as_u64()
                    .unwrap_or(DEFAULT_HEARTBEAT_MS)
            } else {
                warn!("Expected Hello (op 10), got op {}", payload["op"]);
                DEFAULT_HEARTBEAT_MS
            }
        }
        Some(Err(e)) => return Err(e).context("Discord Gateway read failed before Hello"),
        None => bail!("No Hello from Discord Gateway"),
    };
    debug!("Discord heartbeat interval: {}ms", heartbeat_interval);

    let writer = Arc::new(tokio::sync::Mutex::new(ws_write));
    let sequence = Arc::new(AtomicI64::new(-1));

    // Send Identify (opcode 2)
    let identify = json!({
        "op": 2,
        "d": {
            "token": token,
            "intents": GATEWAY_INTENTS,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "parley",
                "device": "parley"
            }
        }
    });
    writer
        .lock()
        .await
        .send(WsMessage::Text(identify.to_string().into()))
        .await
        .context("Failed to send Identify")?;

    // Heartbeats stop with the session
    let heartbeat_stop = shutdown.child_token();
    let _heartbeat_guard = scopeguard::guard(heartbeat_stop.clone(), |stop| stop.cancel());
    let hb_writer = writer.clone();
    let hb_sequence = sequence.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval));
        loop {
            tokio::select! {
                _ = heartbeat_stop.cancelled() => break,
                _ = interval.tick() => {}
            }
            let frame = heartbeat_frame(hb_sequence.load(Ordering::SeqCst));
            if let Err(e) = hb_writer
                .lock()
                .await
                .send(WsMessage::Text(frame.to_string().into()))
                .await
            {
                warn!("Discord heartbeat failed: {}", e);
                break;
            }
        }
    });

    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = writer.lock().await.close().await;
                return Ok(SessionEnd::Stopped);
            }
            next = ws_read.next() => match next {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(e).context("Discord WebSocket error"),
                None => bail!("Discord Gateway closed the connection"),
            },
        };

        if let WsMessage::Close(frame) = &msg {
            if let Some(fatal) = frame
                .as_ref()
                .filter(|f| FATAL_CLOSE_CODES.contains(&u16::from(f.code)))
            {
                return Ok(SessionEnd::Fatal(anyhow!(
                    "Discord Gateway refused the session ({}): {}",
                    u16::from(fatal.code),
                    fatal.reason.as_str()
                )));
            }
            bail!("Discord Gateway sent close frame: {:?}", frame);
        }
        let Ok(text) = msg.to_text() else {
            continue;
        };
        let Ok(payload) = serde_json::from_str::<Value>(text) else {
            continue;
        };

        if let Some(seq) = payload["s"].as_i64() {
            sequence.store(seq, Ordering::SeqCst);
        }

        match payload["op"].as_u64() {
            Some(0) => {}
            Some(1) => {
                let frame = heartbeat_frame(sequence.load(Ordering::SeqCst));
                writer
                    .lock()
                    .await
                    .send(WsMessage::Text(frame.to_string().into()))
                    .await
                    .context("Failed to answer heartbeat request")?;
                continue;
            }
            Some(7) => {
                let _ = writer.lock().await.close().await;
                return Ok(SessionEnd::Reconnect("requested reconnect"));
            }
            Some(9) => {
                let _ = writer.lock().await.close().await;
                return Ok(SessionEnd::Reconnect("invalidated the session"));
            }
            _ => continue,
        }

        let data = &payload["d"];
        match payload["t"].as_str() {
            Some("READY") => {
                *ready = true;
                if let Some(user) = parse_user(&data["user"]) {
                    info!("Logged in to Discord as {} ({})", user.name, user.id);
                    *bot_user.write() = Some(user);
                }
            }
            Some("MESSAGE_CREATE") => {
                let Some(me) = bot_user.read().clone() else {
                    continue;
                };
                if !addresses_bot(data, &me.id) {
                    continue;
                }
                let Some(message) = parse_message(data, Some(&me.id)) else {
                    continue;
                };
                debug!(
                    conversation_id = %message.conversation_id,
                    message_id = %message.id,
                    "Discord message addressed to bot"
                );
                if tx.send(Ok(message)).await.is_err() {
                    debug!("Discord message channel closed");
                    return Ok(SessionEnd::Stopped);
                }
            }
            _ => {}
        }
    }
}

fn heartbeat_frame(sequence: i64) -> Value {
    if sequence < 0 {
        json!({ "op": 1, "d": null })
    } else {
        json!({ "op": 1, "d": sequence })
    }
}

fn parse_user(user: &Value) -> Option<BotUser> {
    let id = user["id"].as_str()?;
    let name = user["global_name"]
        .as_str()
        .or_else(|| user["username"].as_str())
        .unwrap_or(id);
    Some(BotUser {
        id: id.to_string(),
        name: name.to_string(),
    })
}

/// Someone other than the bot wrote the message and mentioned the bot.
fn addresses_bot(data: &Value, bot_id: &str) -> bool {
    if data["author"]["id"].as_str() == Some(bot_id) {
        return false;
    }
    data["mentions"]
        .as_array()
        .is_some_and(|mentions| mentions.iter().any(|m| m["id"].as_str() == Some(bot_id)))
}

/// Replace `<@id>` / `<@!id>` mention tokens with `@name`.
fn clean_content(content: &str, mentions: &[Value]) -> String {
    let mut text = content.to_string();
    for mention in mentions {
        let Some(user) = parse_user(mention) else {
            continue;
        };
        let name = mention["member"]["nick"].as_str().unwrap_or(&user.name);
        let replacement = format!("@{}", name);
        text = text
            .replace(&format!("<@{}>", user.id), &replacement)
            .replace(&format!("<@!{}>", user.id), &replacement);
    }
    text
}

/// Convert a Discord message object into a [`ChatMessage`].
fn parse_message(data: &Value, bot_id: Option<&str>) -> Option<ChatMessage> {
    let id = data["id"].as_str()?;
    let channel_id = data["channel_id"].as_str()?;
    let author = &data["author"];
    let author_id = author["id"].as_str()?;
    let author_name = data["member"]["nick"]
        .as_str()
        .or_else(|| author["global_name"].as_str())
        .or_else(|| author["username"].as_str())
        .unwrap_or(author_id);

    let mentions = data["mentions"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();
    let text = clean_content(data["content"].as_str().unwrap_or(""), mentions);

    let images = data["attachments"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|a| {
            a["content_type"]
                .as_str()
                .is_some_and(|t| t.starts_with("image/"))
        })
        .filter_map(|a| a["url"].as_str().map(str::to_string))
        .collect();

    let timestamp = data["timestamp"]
        .as_str()
        .and_then(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    let message = ChatMessage::new(id, channel_id, author_id, text)
        .with_author_name(author_name)
        .with_images(images)
        .with_timestamp(timestamp);

    Some(if bot_id == Some(author_id) {
        message.own()
    } else {
        message
    })
}

impl MessageSource for DiscordChannel {
    fn start_receiving(&self) -> Option<InboundStream> {
        self.start_gateway()
    }
}

#[async_trait]
impl HistoryProvider for DiscordChannel {
    async fn fetch_history(&self, before: &ChatMessage, limit: usize) -> Result<Vec<ChatMessage>> {
        let me = self.bot_user().await?;
        let limit = limit.clamp(1, DISCORD_MAX_HISTORY_PAGE);
        let url = self.api_url(&format!(
            "/channels/{}/messages?before={}&limit={}",
            before.conversation_id, before.id, limit
        ));

        let resp = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("Discord history request failed")?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("Discord history fetch failed ({}): {}", status, body);
        }

        let body: Value = resp.json().await?;
        let messages = body
            .as_array()
            .ok_or_else(|| anyhow!("Discord history response is not an array"))?
            .iter()
            .filter_map(|data| parse_message(data, Some(&me.id)))
            .collect();
        Ok(messages)
    }
}

#[async_trait]
impl ReplySender for DiscordChannel {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.send_message(&message).await
    }

    fn open_composing_scope(&self, conversation_id: &str) -> ComposingScope {
        let client = self.client.clone();
        let url = self.api_url(&format!("/channels/{}/typing", conversation_id));
        let auth = self.auth_header();

        let refresh = tokio::spawn(async move {
            loop {
                match client
                    .post(&url)
                    .header("Authorization", &auth)
                    .body("")
                    .send()
                    .await
                {
                    Ok(resp) if !resp.status().is_success() => {
                        debug!("Discord typing trigger rejected ({})", resp.status())
                    }
                    Err(e) => debug!("Discord typing trigger failed: {}", e),
                    Ok(_) => {}
                }
                tokio::time::sleep(TYPING_REFRESH).await;
            }
        });

        ComposingScope::with_refresh_task(refresh)
    }
}

#[async_trait]
impl ChatChannel for DiscordChannel {
    fn name(&self) -> &str {
        "Discord"
    }

    fn is_configured(&self) -> bool {
        !self.config.bot_token.trim().is_empty()
    }

    async fn stop(&self) -> Result<()> {
        self.shutdown.lock().cancel();
        Ok(())
    }
}
