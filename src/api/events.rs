use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A row-level change pushed by the realtime service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostgresChange {
    #[serde(skip)]
    pub topic: String,
    #[serde(default)]
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
}

impl PostgresChange {
    /// Decode the `payload` of a `postgres_changes` frame (`{"data": {...}, "ids": [...]}`).
    pub fn from_payload(topic: &str, payload: &serde_json::Value) -> Option<Self> {
        let data = payload.get("data")?;
        match serde_json::from_value::<PostgresChange>(data.clone()) {
            Ok(mut change) => {
                change.topic = topic.to_string();
                Some(change)
            }
            Err(e) => {
                log::debug!("undecodable change on {topic}: {e}");
                None
            }
        }
    }

    pub fn record_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.record.clone())?)
    }

    pub fn record_str(&self, key: &str) -> Option<&str> {
        self.record.get(key).and_then(|v| v.as_str())
    }

    /// Column of the row before the change. Deletes only carry the replica
    /// identity here.
    pub fn old_str(&self, key: &str) -> Option<&str> {
        self.old_record.get(key).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::TypingIndicator;
    use serde_json::json;

    #[test]
    fn decodes_insert_frame() {
        let payload = json!({
            "data": {
                "columns": [{"name": "id", "type": "uuid"}],
                "commit_timestamp": "2024-05-01T10:00:00Z",
                "errors": null,
                "record": {"conversation_id": "c1", "user_id": "u2", "is_typing": true},
                "schema": "public",
                "table": "typing_indicators",
                "type": "INSERT"
            },
            "ids": [41]
        });
        let change = PostgresChange::from_payload("typing-c1", &payload).unwrap();
        assert_eq!(change.topic, "typing-c1");
        assert_eq!(change.kind, ChangeKind::Insert);
        assert_eq!(change.record_str("user_id"), Some("u2"));
        let typing: TypingIndicator = change.record_as().unwrap();
        assert!(typing.is_typing);
        assert!(change.old_record.is_null());
    }

    #[test]
    fn rejects_frames_without_data() {
        assert!(PostgresChange::from_payload("t", &json!({"ids": []})).is_none());
        assert!(PostgresChange::from_payload("t", &json!({"data": {"type": "TRUNCATE", "table": "x"}})).is_none());
    }
}
