//! Public handle for interacting with the realtime connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;

use super::connection::{Shared, connection_loop};
use super::types::{ChannelConfig, RealtimeCommand, RealtimeConfig, RealtimeEvent};

/// Handle for interacting with the realtime connection.
///
/// All methods are non-blocking and send commands to the background
/// connection task. Clones talk to the same connection.
#[derive(Clone)]
pub struct RealtimeClient {
    command_tx: mpsc::Sender<RealtimeCommand>,
    connected: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl RealtimeClient {
    /// Create a new client and start the background connection on the
    /// current tokio runtime. Returns `(client, event_receiver)`.
    pub fn connect(config: RealtimeConfig) -> (Self, mpsc::Receiver<RealtimeEvent>) {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let connected = Arc::new(AtomicBool::new(false));
        let shared = Arc::new(Shared::new(config.access_token.clone()));

        let client = Self {
            command_tx,
            connected: Arc::clone(&connected),
            shared: Arc::clone(&shared),
        };

        tokio::spawn(connection_loop(config, shared, connected, event_tx, command_rx));

        (client, event_rx)
    }

    /// Join a channel, replacing any previous channel with the same topic.
    pub async fn subscribe(&self, topic: &str, config: ChannelConfig) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::JoinChannel {
                topic: topic.to_string(),
                config,
            })
            .await;
    }

    /// Leave a channel.
    pub async fn unsubscribe(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::LeaveChannel {
                topic: topic.to_string(),
            })
            .await;
    }

    /// Send the join again for a channel the server closed. Topics that are
    /// no longer subscribed are skipped.
    pub async fn rejoin(&self, topic: &str) {
        let _ = self
            .command_tx
            .send(RealtimeCommand::Rejoin {
                topic: topic.to_string(),
            })
            .await;
    }

    /// Push a refreshed access token to every joined channel.
    pub async fn set_auth(&self, token: Option<String>) {
        let _ = self.command_tx.send(RealtimeCommand::SetAuth { token }).await;
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Leave every channel and stop reconnecting.
    pub async fn disconnect(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.command_tx.send(RealtimeCommand::Disconnect).await;
    }
}
