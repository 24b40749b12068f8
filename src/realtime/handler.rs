//! Incoming Phoenix message translation.

use log::{debug, info, warn};

use super::types::{PhoenixMessage, RealtimeEvent};
use crate::api::events::PostgresChange;

/// Extract the short topic name from a Phoenix topic (strip "realtime:" prefix).
pub(crate) fn strip_topic_prefix(topic: &str) -> &str {
    topic.strip_prefix("realtime:").unwrap_or(topic)
}

/// Translate a single incoming Phoenix message into an application event.
pub(crate) fn translate(msg: &PhoenixMessage) -> Option<RealtimeEvent> {
    // Heartbeat replies.
    if msg.topic == "phoenix" {
        return None;
    }
    let topic = strip_topic_prefix(&msg.topic).to_string();

    match msg.event.as_str() {
        "phx_reply" => {
            let status = msg.payload.get("status").and_then(|s| s.as_str())?;
            if status == "ok" {
                debug!(target: "realtime", "channel reply ok: {topic}");
                Some(RealtimeEvent::ChannelJoined { topic })
            } else {
                let message = msg
                    .payload
                    .get("response")
                    .and_then(|r| r.get("reason"))
                    .and_then(|r| r.as_str())
                    .unwrap_or("unknown error")
                    .to_string();
                warn!(target: "realtime", "channel reply {status} on {topic}: {message}");
                Some(RealtimeEvent::ChannelError { topic, message })
            }
        }
        "system" => {
            // Sent once the postgres_changes bindings are (or fail to be) attached.
            let status = msg.payload.get("status").and_then(|s| s.as_str()).unwrap_or("ok");
            if status == "ok" {
                None
            } else {
                let message = msg
                    .payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("subscription failed")
                    .to_string();
                warn!(target: "realtime", "system error on {topic}: {message}");
                Some(RealtimeEvent::ChannelError { topic, message })
            }
        }
        "phx_error" => {
            warn!(target: "realtime", "channel error on {topic}");
            Some(RealtimeEvent::ChannelError { topic, message: "Channel error".to_string() })
        }
        "phx_close" => {
            info!(target: "realtime", "channel closed: {topic}");
            Some(RealtimeEvent::ChannelError { topic, message: "Channel closed".to_string() })
        }
        "postgres_changes" => PostgresChange::from_payload(&topic, &msg.payload).map(RealtimeEvent::Change),
        other => {
            debug!(target: "realtime", "unhandled event {other} on {topic}");
            None
        }
    }
}
