use chrono::{DateTime, TimeZone};
use std::fmt::Display;

use crate::api::models::{Message, TypingIndicator};
use crate::chat::time;
use crate::realtime::{ChangeBinding, ChannelConfig};

/// Messages closer together than this, from the same sender, are grouped.
pub const CONSECUTIVE_WINDOW_SECS: i64 = 5 * 60;

pub fn messages_topic(conversation_id: &str) -> String {
    format!("messages-{conversation_id}")
}

pub fn typing_topic(conversation_id: &str) -> String {
    format!("typing-{conversation_id}")
}

/// Conversation id of a `typing-<id>` topic.
pub fn typing_topic_conversation(topic: &str) -> Option<&str> {
    topic.strip_prefix("typing-").filter(|id| !id.is_empty())
}

pub fn message_channel(conversation_id: &str) -> ChannelConfig {
    ChannelConfig::default().with(ChangeBinding::filtered(
        "INSERT",
        "messages",
        format!("conversation_id=eq.{conversation_id}"),
    ))
}

pub fn typing_channel(conversation_id: &str) -> ChannelConfig {
    ChannelConfig::default().with(ChangeBinding::filtered(
        "*",
        "typing_indicators",
        format!("conversation_id=eq.{conversation_id}"),
    ))
}

/// How one message renders relative to its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub index: usize,
    pub is_own: bool,
    pub date_separator: Option<String>,
    pub show_avatar: bool,
    pub consecutive: bool,
    pub show_sender_name: bool,
    pub time_label: String,
    /// Own messages only: someone besides the sender has read it.
    pub read: bool,
}

/// One open conversation: its messages in ascending order and whether the
/// peer is typing.
#[derive(Debug, Clone)]
pub struct Thread {
    conversation_id: String,
    me: String,
    messages: Vec<Message>,
    peer_typing: bool,
}

impl Thread {
    pub fn new(conversation_id: &str, me: &str) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            me: me.to_string(),
            messages: Vec::new(),
            peer_typing: false,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn load(&mut self, mut messages: Vec<Message>) {
        messages.retain(|m| !m.deleted && m.conversation_id == self.conversation_id);
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        messages.dedup_by(|a, b| a.id == b.id);
        self.messages = messages;
    }

    /// Merge a pushed message. Returns false when it was ignored.
    pub fn apply_insert(&mut self, message: Message) -> bool {
        if message.deleted
            || message.conversation_id != self.conversation_id
            || self.messages.iter().any(|m| m.id == message.id)
        {
            return false;
        }
        let pos = self.messages.partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(pos, message);
        true
    }

    /// Track the peer's typing flag; my own rows are ignored. Returns whether
    /// the flag changed.
    pub fn apply_typing(&mut self, indicator: &TypingIndicator) -> bool {
        if indicator.conversation_id != self.conversation_id || indicator.user_id == self.me {
            return false;
        }
        let changed = self.peer_typing != indicator.is_typing;
        self.peer_typing = indicator.is_typing;
        changed
    }

    /// A peer's indicator row was deleted. `user_id` is `None` when the
    /// delete did not say whose it was.
    pub fn clear_typing(&mut self, conversation_id: &str, user_id: Option<&str>) -> bool {
        if conversation_id != self.conversation_id || user_id == Some(self.me.as_str()) {
            return false;
        }
        std::mem::replace(&mut self.peer_typing, false)
    }

    pub fn layout<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Vec<MessageRow>
    where
        Tz::Offset: Display,
    {
        self.messages
            .iter()
            .enumerate()
            .map(|(index, message)| {
                let previous = index.checked_sub(1).and_then(|i| self.messages.get(i));
                let next = self.messages.get(index + 1);
                let is_own = message.sender_id == self.me;

                let date_separator = match previous {
                    Some(prev) if time::same_day(prev.timestamp, message.timestamp, now) => None,
                    _ => Some(time::date_separator(message.timestamp, now)),
                };
                let consecutive = previous.is_some_and(|prev| {
                    prev.sender_id == message.sender_id
                        && (message.timestamp - prev.timestamp).num_seconds() < CONSECUTIVE_WINDOW_SECS
                });
                let last_of_run = next.is_none_or(|n| n.sender_id != message.sender_id);

                MessageRow {
                    index,
                    is_own,
                    date_separator,
                    show_avatar: !is_own && last_of_run,
                    consecutive,
                    show_sender_name: !is_own && !consecutive,
                    time_label: time::message_time(message.timestamp, now),
                    read: is_own && message.read_by.len() > 1,
                }
            })
            .collect()
    }
}

/// The message input box.
#[derive(Debug, Default, Clone)]
pub struct Composer {
    pub text: String,
    sending: bool,
}

impl Composer {
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    pub fn can_send(&self) -> bool {
        !self.sending && !self.text.trim().is_empty()
    }

    /// Take the trimmed text for sending and clear the box, or `None` if
    /// there is nothing to send or a send is already in flight.
    pub fn begin_send(&mut self) -> Option<String> {
        if !self.can_send() {
            return None;
        }
        let content = self.text.trim().to_string();
        self.text.clear();
        self.sending = true;
        Some(content)
    }

    /// Finish a send. A failed send puts the text back.
    pub fn finish_send(&mut self, content: String, ok: bool) {
        self.sending = false;
        if !ok {
            self.text = content;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn msg(id: &str, sender: &str, ts: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            conversation_id: "c1".into(),
            sender_id: sender.into(),
            content: Some(format!("body {id}")),
            message_type: Default::default(),
            file_url: None,
            file_name: None,
            file_size: None,
            reply_to_id: None,
            edited: false,
            deleted: false,
            read_by: Vec::new(),
            timestamp: ts,
            updated_at: None,
            sender: None,
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn load_filters_and_orders() {
        let mut t = Thread::new("c1", "me");
        let mut deleted = msg("d", "bob", base());
        deleted.deleted = true;
        let mut foreign = msg("f", "bob", base());
        foreign.conversation_id = "c2".into();
        t.load(vec![
            msg("b", "bob", base() + Duration::minutes(2)),
            deleted,
            msg("a", "me", base()),
            foreign,
        ]);
        let ids: Vec<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn inserts_dedupe_and_keep_order() {
        let mut t = Thread::new("c1", "me");
        t.load(vec![msg("a", "me", base()), msg("c", "bob", base() + Duration::minutes(10))]);
        assert!(t.apply_insert(msg("b", "bob", base() + Duration::minutes(5))));
        assert!(!t.apply_insert(msg("b", "bob", base() + Duration::minutes(5))));
        let mut gone = msg("x", "bob", base());
        gone.deleted = true;
        assert!(!t.apply_insert(gone));
        let ids: Vec<&str> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn typing_ignores_self_and_other_threads() {
        let mut t = Thread::new("c1", "me");
        let ind = |user: &str, conv: &str, typing: bool| TypingIndicator {
            conversation_id: conv.into(),
            user_id: user.into(),
            is_typing: typing,
            updated_at: None,
        };
        assert!(!t.apply_typing(&ind("me", "c1", true)));
        assert!(!t.apply_typing(&ind("bob", "c2", true)));
        assert!(t.apply_typing(&ind("bob", "c1", true)));
        assert!(t.peer_typing());
        assert!(!t.apply_typing(&ind("bob", "c1", true)));
        assert!(t.apply_typing(&ind("bob", "c1", false)));
        assert!(!t.peer_typing());
    }

    #[test]
    fn deleted_indicator_clears_peer_typing() {
        let mut t = Thread::new("c1", "me");
        let bob = TypingIndicator {
            conversation_id: "c1".into(),
            user_id: "bob".into(),
            is_typing: true,
            updated_at: None,
        };
        t.apply_typing(&bob);
        assert!(!t.clear_typing("c2", None));
        assert!(!t.clear_typing("c1", Some("me")));
        assert!(t.peer_typing());
        assert!(t.clear_typing("c1", None));
        assert!(!t.peer_typing());
        assert!(!t.clear_typing("c1", Some("bob")));
    }

    #[test]
    fn layout_grouping_rules() {
        let now = base() + Duration::hours(1);
        let mut t = Thread::new("c1", "me");
        let yesterday = base() - Duration::days(1);
        let mut read = msg("m5", "me", base() + Duration::minutes(20));
        read.read_by = vec!["me".into(), "bob".into()];
        t.load(vec![
            msg("m1", "bob", yesterday),
            msg("m2", "bob", base()),
            msg("m3", "bob", base() + Duration::minutes(3)),
            msg("m4", "bob", base() + Duration::minutes(10)),
            read,
        ]);
        let rows = t.layout(&now);

        assert_eq!(rows[0].date_separator.as_deref(), Some("Yesterday"));
        assert_eq!(rows[1].date_separator.as_deref(), Some("Today"));
        assert!(rows[2].date_separator.is_none());

        // m2 -> m3 is within five minutes, m3 -> m4 is not.
        assert!(!rows[1].consecutive);
        assert!(rows[2].consecutive);
        assert!(!rows[3].consecutive);
        assert!(rows[1].show_sender_name);
        assert!(!rows[2].show_sender_name);

        // Avatar only on the last of a run of the peer's messages.
        assert!(!rows[2].show_avatar);
        assert!(rows[3].show_avatar);
        assert!(!rows[4].show_avatar);

        assert!(rows[4].is_own);
        assert!(rows[4].read);
        assert!(!rows[4].show_sender_name);
        assert_eq!(rows[4].time_label, "12:20");
        assert_eq!(rows[0].time_label, "Yesterday 12:00");
    }

    #[test]
    fn composer_send_cycle() {
        let mut c = Composer::default();
        assert!(c.begin_send().is_none());
        c.text = "   ".into();
        assert!(c.begin_send().is_none());

        c.text = "  hi there ".into();
        let content = c.begin_send().unwrap();
        assert_eq!(content, "hi there");
        assert!(c.text.is_empty());
        assert!(c.is_sending());

        c.text = "second".into();
        assert!(c.begin_send().is_none());

        c.finish_send(content, false);
        assert_eq!(c.text, "hi there");
        assert!(!c.is_sending());
    }

    #[test]
    fn channels_filter_by_conversation() {
        assert_eq!(messages_topic("c1"), "messages-c1");
        assert_eq!(typing_topic("c1"), "typing-c1");
        assert_eq!(typing_topic_conversation("typing-c1"), Some("c1"));
        assert_eq!(typing_topic_conversation("typing-"), None);
        assert_eq!(typing_topic_conversation("messages-c1"), None);
        let m = message_channel("c1");
        assert_eq!(m.bindings[0].event, "INSERT");
        assert_eq!(m.bindings[0].filter.as_deref(), Some("conversation_id=eq.c1"));
        assert_eq!(typing_channel("c1").bindings[0].table, "typing_indicators");
    }
}
