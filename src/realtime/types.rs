//! Configuration, protocol types, and event/command enums for the realtime client.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::api::events::PostgresChange;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to the realtime socket.
#[derive(Clone)]
pub struct RealtimeConfig {
    /// Full socket URL including `apikey` and `vsn`.
    pub url: Url,
    /// Access token (JWT) sent with every channel join.
    pub access_token: Option<String>,
    /// Heartbeat interval in seconds (default: 25).
    pub heartbeat_interval_secs: u64,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl std::fmt::Debug for RealtimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeConfig")
            .field("host", &self.url.host_str())
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("heartbeat_interval_secs", &self.heartbeat_interval_secs)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("max_reconnect_delay_secs", &self.max_reconnect_delay_secs)
            .finish()
    }
}

impl RealtimeConfig {
    pub fn new(base_url: &str, api_key: &str, access_token: Option<String>) -> Result<Self> {
        Ok(Self {
            url: crate::utils::realtime_url(base_url, api_key)?,
            access_token,
            heartbeat_interval_secs: 25,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
        })
    }
}

/// Next reconnect delay: doubled, capped.
pub(crate) fn next_backoff(current: u64, max: u64) -> u64 {
    (current.max(1) * 2).min(max)
}

// ---------------------------------------------------------------------------
// Phoenix Protocol Types
// ---------------------------------------------------------------------------

/// A Phoenix protocol message envelope (v1 JSON format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    pub payload: serde_json::Value,
    #[serde(rename = "ref")]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub(crate) fn channel(topic: &str, event: &str, payload: serde_json::Value, msg_ref: String) -> Self {
        Self {
            topic: format!("realtime:{topic}"),
            event: event.to_string(),
            payload,
            msg_ref: Some(msg_ref),
            join_ref: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Channel Configuration
// ---------------------------------------------------------------------------

/// One row-change subscription inside a channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeBinding {
    /// `INSERT`, `UPDATE`, `DELETE` or `*`.
    pub event: String,
    pub table: String,
    /// PostgREST-style filter, e.g. `conversation_id=eq.42`. Only one per binding.
    pub filter: Option<String>,
}

impl ChangeBinding {
    pub fn new(event: &str, table: &str) -> Self {
        Self { event: event.to_string(), table: table.to_string(), filter: None }
    }

    pub fn filtered(event: &str, table: &str, filter: String) -> Self {
        Self { event: event.to_string(), table: table.to_string(), filter: Some(filter) }
    }
}

/// Configuration for a realtime channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelConfig {
    pub bindings: Vec<ChangeBinding>,
}

impl ChannelConfig {
    pub fn with(mut self, binding: ChangeBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Serialize to the JSON payload expected by phx_join.
    pub(crate) fn to_join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let changes: Vec<serde_json::Value> = self
            .bindings
            .iter()
            .map(|b| {
                let mut entry = serde_json::json!({
                    "event": b.event,
                    "schema": "public",
                    "table": b.table,
                });
                if let Some(filter) = &b.filter {
                    entry["filter"] = serde_json::Value::String(filter.clone());
                }
                entry
            })
            .collect();
        let mut payload = serde_json::json!({
            "config": {
                "broadcast": { "self": false, "ack": false },
                "presence": { "key": "" },
                "postgres_changes": changes,
                "private": false
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = serde_json::Value::String(token.to_string());
        }
        payload
    }
}

// ---------------------------------------------------------------------------
// Events & Commands
// ---------------------------------------------------------------------------

/// Events emitted by the realtime client.
#[derive(Debug, Clone)]
pub enum RealtimeEvent {
    /// WebSocket connection established.
    Connected,
    /// WebSocket connection lost.
    Disconnected,
    /// Successfully joined a channel.
    ChannelJoined { topic: String },
    /// Channel closed or errored.
    ChannelError { topic: String, message: String },
    /// A row changed.
    Change(PostgresChange),
    /// Error.
    Error(String),
}

/// Commands sent to the realtime client from the application layer.
#[derive(Debug)]
pub(crate) enum RealtimeCommand {
    JoinChannel { topic: String, config: ChannelConfig },
    LeaveChannel { topic: String },
    Rejoin { topic: String },
    SetAuth { token: Option<String> },
    Disconnect,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_payload_lists_bindings() {
        let config = ChannelConfig::default()
            .with(ChangeBinding::filtered("*", "conversations", "participant1_id=eq.u1".into()))
            .with(ChangeBinding::new("UPDATE", "profiles"));
        let payload = config.to_join_payload(Some("jwt"));
        let changes = payload["config"]["postgres_changes"].as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["filter"], "participant1_id=eq.u1");
        assert_eq!(changes[0]["schema"], "public");
        assert!(changes[1].get("filter").is_none());
        assert_eq!(payload["access_token"], "jwt");

        assert!(config.to_join_payload(None).get("access_token").is_none());
    }

    #[test]
    fn channel_message_prefixes_topic() {
        let msg = PhoenixMessage::channel("typing-c1", "phx_leave", serde_json::json!({}), "7".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["topic"], "realtime:typing-c1");
        assert_eq!(json["ref"], "7");
        assert!(json.get("join_ref").is_none());
    }

    #[test]
    fn backoff_doubles_to_cap() {
        assert_eq!(next_backoff(1, 30), 2);
        assert_eq!(next_backoff(16, 30), 30);
        assert_eq!(next_backoff(30, 30), 30);
        assert_eq!(next_backoff(0, 30), 2);
    }

    #[test]
    fn debug_hides_key() {
        let config = RealtimeConfig::new("https://abc.supabase.co", "secret-key", Some("jwt".into())).unwrap();
        let out = format!("{config:?}");
        assert!(!out.contains("secret-key"));
        assert!(!out.contains("jwt"));
        assert_eq!(config.heartbeat_interval_secs, 25);
    }
}
