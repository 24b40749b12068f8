use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A user's public record. Embedded selects only fetch a subset of columns,
/// so everything except `id` tolerates being absent.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Profile {
    pub id: String,
    pub google_id: Option<String>,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Profile {
    pub fn display_name(&self) -> &str {
        non_empty(&self.full_name)
            .or_else(|| non_empty(&self.username))
            .unwrap_or("")
    }

    pub fn handle(&self) -> String {
        format!("@{}", self.username.as_deref().unwrap_or(""))
    }

    pub fn has_username(&self) -> bool {
        non_empty(&self.username).is_some()
    }

    /// Copy presence and identity columns from a newer row of the same user.
    pub fn merge_from(&mut self, newer: &Profile) {
        self.username = newer.username.clone();
        self.full_name = newer.full_name.clone();
        self.avatar_url = newer.avatar_url.clone();
        self.is_online = newer.is_online;
        if newer.last_seen.is_some() {
            self.last_seen = newer.last_seen;
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LastMessage {
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub participant1_id: String,
    pub participant2_id: String,
    #[serde(default)]
    pub last_message_id: Option<String>,
    #[serde(default)]
    pub last_message_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant1: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant2: Option<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
}

impl Conversation {
    pub fn involves(&self, user_id: &str) -> bool {
        self.participant1_id == user_id || self.participant2_id == user_id
    }

    pub fn pairs(&self, a: &str, b: &str) -> bool {
        (self.participant1_id == a && self.participant2_id == b)
            || (self.participant1_id == b && self.participant2_id == a)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<i64>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, deserialize_with = "read_by_ids")]
    pub read_by: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Profile>,
}

impl Message {
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// `read_by` is an untyped JSON column: anything but an array of ids reads as empty.
fn read_by_ids<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default())
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TypingIndicator {
    pub conversation_id: String,
    pub user_id: String,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ProfileUpsert {
    pub id: String,
    pub google_id: Option<String>,
    pub username: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub is_online: bool,
}

/// Partial profile write. The outer `Option` selects the column; an inner
/// `None` writes `null`.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_online: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl ProfileUpdate {
    pub fn presence(online: bool, now: DateTime<Utc>) -> Self {
        Self { is_online: Some(online), last_seen: Some(now), ..Self::default() }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NewConversation {
    pub participant1_id: String,
    pub participant2_id: String,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn embedded_profile_subset_parses() {
        let p: Profile = serde_json::from_value(json!({
            "id": "u2", "username": "bob", "full_name": null, "avatar_url": null
        }))
        .unwrap();
        assert_eq!(p.display_name(), "bob");
        assert!(!p.is_online);
        assert!(p.last_seen.is_none());
    }

    #[test]
    fn display_name_prefers_full_name() {
        let p = Profile {
            id: "u1".into(),
            username: Some("alice".into()),
            full_name: Some("Alice Liddell".into()),
            ..Profile::default()
        };
        assert_eq!(p.display_name(), "Alice Liddell");
        assert_eq!(p.handle(), "@alice");

        let blank = Profile { full_name: Some("  ".into()), ..p.clone() };
        assert_eq!(blank.display_name(), "alice");
        assert_eq!(Profile::default().display_name(), "");
    }

    #[test]
    fn conversation_with_embeds_parses() {
        let c: Conversation = serde_json::from_value(json!({
            "id": "c1",
            "participant1_id": "u1",
            "participant2_id": "u2",
            "last_message_id": "m9",
            "last_message_timestamp": "2024-05-01T10:00:00.123456+00:00",
            "created_at": "2024-04-01T10:00:00+00:00",
            "updated_at": "2024-05-01T10:00:00+00:00",
            "participant1": {"id": "u1", "username": "alice", "is_online": true,
                             "last_seen": "2024-05-01T09:00:00+00:00"},
            "participant2": {"id": "u2", "username": "bob", "is_online": false,
                             "last_seen": "2024-05-01T08:00:00+00:00"},
            "last_message": {"content": "hi", "timestamp": "2024-05-01T10:00:00+00:00",
                             "sender_id": "u2"}
        }))
        .unwrap();
        assert!(c.involves("u2"));
        assert!(c.pairs("u2", "u1"));
        assert!(!c.pairs("u1", "u3"));
        assert_eq!(c.last_message.unwrap().content.as_deref(), Some("hi"));
    }

    #[test]
    fn message_tolerates_odd_read_by() {
        let base = json!({
            "id": "m1", "conversation_id": "c1", "sender_id": "u1",
            "content": "hey", "message_type": "text",
            "timestamp": "2024-05-01T10:00:00+00:00"
        });

        let mut with_ids = base.clone();
        with_ids["read_by"] = json!(["u1", "u2"]);
        let m: Message = serde_json::from_value(with_ids).unwrap();
        assert_eq!(m.read_by, vec!["u1", "u2"]);

        let mut with_null = base.clone();
        with_null["read_by"] = serde_json::Value::Null;
        let m: Message = serde_json::from_value(with_null).unwrap();
        assert!(m.read_by.is_empty());

        let mut odd_type = base;
        odd_type["message_type"] = json!("sticker");
        let m: Message = serde_json::from_value(odd_type).unwrap();
        assert_eq!(m.message_type, MessageType::Unknown);
        assert_eq!(m.text(), "hey");
    }

    #[test]
    fn profile_update_serializes_nulls_only_when_selected() {
        let update = ProfileUpdate {
            full_name: Some(None),
            avatar_url: Some(Some("https://x/avatars/a.png".into())),
            ..ProfileUpdate::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"full_name": null, "avatar_url": "https://x/avatars/a.png"})
        );
        assert_eq!(serde_json::to_value(ProfileUpdate::default()).unwrap(), json!({}));
    }

    #[test]
    fn new_message_is_text() {
        let msg = NewMessage {
            conversation_id: "c1".into(),
            sender_id: "u1".into(),
            content: "hello".into(),
            message_type: MessageType::Text,
        };
        assert_eq!(serde_json::to_value(&msg).unwrap()["message_type"], "text");
    }
}
