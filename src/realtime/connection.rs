//! Background WebSocket connection loop with auto-reconnect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use super::handler::translate;
use super::types::{
    ChannelConfig, PhoenixMessage, RealtimeCommand, RealtimeConfig, RealtimeEvent, next_backoff,
};

/// Monotonically increasing ref counter for Phoenix messages.
static REF_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_ref() -> String {
    REF_COUNTER.fetch_add(1, Ordering::Relaxed).to_string()
}

/// State shared between the read loop and the command forwarder. Channels
/// stay here so they can be rejoined after a reconnect.
pub(crate) struct Shared {
    pub(crate) channels: RwLock<HashMap<String, ChannelConfig>>,
    pub(crate) access_token: RwLock<Option<String>>,
    pub(crate) shutdown: AtomicBool,
}

impl Shared {
    pub(crate) fn new(access_token: Option<String>) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            access_token: RwLock::new(access_token),
            shutdown: AtomicBool::new(false),
        }
    }
}

async fn push<S>(writer: &Mutex<S>, msg: &PhoenixMessage) -> bool
where
    S: Sink<WsMessage> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => writer.lock().await.send(WsMessage::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(target: "realtime", "unserializable frame: {e}");
            false
        }
    }
}

fn join_message(topic: &str, config: &ChannelConfig, token: Option<&str>) -> PhoenixMessage {
    let msg_ref = next_ref();
    let mut msg = PhoenixMessage::channel(topic, "phx_join", config.to_join_payload(token), msg_ref.clone());
    msg.join_ref = Some(msg_ref);
    msg
}

/// Background task managing the WebSocket connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: RealtimeConfig,
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
    event_tx: mpsc::Sender<RealtimeEvent>,
    command_rx: mpsc::Receiver<RealtimeCommand>,
) {
    let command_rx = Arc::new(Mutex::new(command_rx));
    let mut reconnect_delay = config.reconnect_delay_secs;

    while !shared.shutdown.load(Ordering::SeqCst) {
        info!(target: "realtime", "connecting to {}", config.url.host_str().unwrap_or(""));

        match tokio::time::timeout(
            Duration::from_secs(15),
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = config.reconnect_delay_secs;
                connected.store(true, Ordering::SeqCst);
                let _ = event_tx.send(RealtimeEvent::Connected).await;

                let (ws_write, mut ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                // Rejoin previously-joined channels.
                {
                    let token = shared.access_token.read().await.clone();
                    let channels = shared.channels.read().await;
                    for (topic, channel) in channels.iter() {
                        push(&ws_write, &join_message(topic, channel, token.as_deref())).await;
                    }
                }

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    config.heartbeat_interval_secs,
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&shared),
                ));

                while let Some(msg_result) = ws_read.next().await {
                    match msg_result {
                        Ok(WsMessage::Text(text)) => match serde_json::from_str::<PhoenixMessage>(&text) {
                            Ok(phoenix_msg) => {
                                if let Some(event) = translate(&phoenix_msg) {
                                    if event_tx.send(event).await.is_err() {
                                        // Nobody is listening any more.
                                        shared.shutdown.store(true, Ordering::SeqCst);
                                        break;
                                    }
                                }
                            }
                            Err(_) => debug!(target: "realtime", "unrecognized frame: {text}"),
                        },
                        Ok(WsMessage::Close(_)) => {
                            info!(target: "realtime", "server closed connection");
                            break;
                        }
                        Err(e) => {
                            warn!(target: "realtime", "websocket error: {e}");
                            break;
                        }
                        _ => {}
                    }
                }

                heartbeat_handle.abort();
                cmd_handle.abort();
                connected.store(false, Ordering::SeqCst);
                let _ = event_tx.send(RealtimeEvent::Disconnected).await;
            }
            Ok(Err(e)) => {
                error!(target: "realtime", "failed to connect: {e}");
                let _ = event_tx
                    .send(RealtimeEvent::Error(format!("Connection failed: {e}")))
                    .await;
            }
            Err(_elapsed) => {
                error!(target: "realtime", "connection timed out after 15s");
                let _ = event_tx
                    .send(RealtimeEvent::Error("Connection timed out after 15s".to_string()))
                    .await;
            }
        }

        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        info!(target: "realtime", "reconnecting in {reconnect_delay}s");
        tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
        reconnect_delay = next_backoff(reconnect_delay, config.max_reconnect_delay_secs);
    }
    info!(target: "realtime", "connection loop stopped");
}

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval_secs: u64)
where
    S: Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        interval.tick().await;
        let msg = PhoenixMessage {
            topic: "phoenix".to_string(),
            event: "heartbeat".to_string(),
            payload: serde_json::json!({}),
            msg_ref: Some(next_ref()),
            join_ref: None,
        };
        if !push(&ws_write, &msg).await {
            break;
        }
    }
}

async fn command_forwarder<S>(
    cmd_rx: Arc<Mutex<mpsc::Receiver<RealtimeCommand>>>,
    ws_write: Arc<Mutex<S>>,
    shared: Arc<Shared>,
) where
    S: Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RealtimeCommand::JoinChannel { topic, config } => {
                let token = shared.access_token.read().await.clone();
                push(&ws_write, &join_message(&topic, &config, token.as_deref())).await;
                shared.channels.write().await.insert(topic, config);
            }
            RealtimeCommand::LeaveChannel { topic } => {
                let msg = PhoenixMessage::channel(&topic, "phx_leave", serde_json::json!({}), next_ref());
                push(&ws_write, &msg).await;
                shared.channels.write().await.remove(&topic);
            }
            RealtimeCommand::Rejoin { topic } => {
                let config = shared.channels.read().await.get(&topic).cloned();
                match config {
                    Some(config) => {
                        let token = shared.access_token.read().await.clone();
                        push(&ws_write, &join_message(&topic, &config, token.as_deref())).await;
                    }
                    None => debug!(target: "realtime", "not rejoining {topic}: no longer subscribed"),
                }
            }
            RealtimeCommand::SetAuth { token } => {
                *shared.access_token.write().await = token.clone();
                if let Some(token) = token {
                    let channels = shared.channels.read().await;
                    for topic in channels.keys() {
                        let msg = PhoenixMessage::channel(
                            topic,
                            "access_token",
                            serde_json::json!({ "access_token": token }),
                            next_ref(),
                        );
                        push(&ws_write, &msg).await;
                    }
                }
            }
            RealtimeCommand::Disconnect => {
                shared.shutdown.store(true, Ordering::SeqCst);
                let channels = shared.channels.read().await;
                for topic in channels.keys() {
                    let msg = PhoenixMessage::channel(topic, "phx_leave", serde_json::json!({}), next_ref());
                    push(&ws_write, &msg).await;
                }
                drop(channels);
                let _ = ws_write.lock().await.send(WsMessage::Close(None)).await;
                return;
            }
        }
    }
    // Every client handle is gone.
    shared.shutdown.store(true, Ordering::SeqCst);
    let _ = ws_write.lock().await.send(WsMessage::Close(None)).await;
}
