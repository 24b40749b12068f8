use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, TimeZone};

use crate::api::models::{Conversation, Profile};
use crate::chat::time;
use crate::realtime::{ChangeBinding, ChannelConfig};

pub const PREVIEW_CHARS: usize = 40;
pub const SEARCH_MIN_CHARS: usize = 2;
pub const SEARCH_DEBOUNCE: Duration = Duration::from_millis(300);

pub const CONVERSATIONS_TOPIC: &str = "conversations";
pub const PROFILES_TOPIC: &str = "profiles";

pub fn other_participant<'a>(conv: &'a Conversation, me: &str) -> Option<&'a Profile> {
    if conv.participant1_id == me {
        conv.participant2.as_ref()
    } else {
        conv.participant1.as_ref()
    }
}

/// One-line summary of the latest message for the sidebar.
pub fn preview(conv: &Conversation, me: &str) -> String {
    let Some(last) = conv.last_message.as_ref() else {
        return "No messages yet".to_string();
    };
    let content = match last.content.as_deref() {
        Some(c) if !c.is_empty() => c,
        _ => return "No messages yet".to_string(),
    };
    let prefix = if last.sender_id == me { "You: " } else { "" };
    if content.chars().count() > PREVIEW_CHARS {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{prefix}{cut}...")
    } else {
        format!("{prefix}{content}")
    }
}

/// "Last seen 5 minutes ago" for an offline peer whose last activity is
/// known.
pub fn last_seen_caption<Tz: TimeZone>(peer: &Profile, now: &DateTime<Tz>) -> Option<String>
where
    Tz::Offset: Display,
{
    match peer {
        Profile { is_online: false, last_seen: Some(seen), .. } => {
            Some(format!("Last seen {}", time::relative(*seen, now)))
        }
        _ => None,
    }
}

/// The search term to send, or `None` when the query is too short and the
/// results should be cleared.
pub fn search_term(query: &str) -> Option<&str> {
    (query.chars().count() >= SEARCH_MIN_CHARS).then_some(query)
}

/// Changes to conversations I take part in. The platform accepts a single
/// filter per binding, so each side of the pair gets its own.
pub fn conversation_channel(me: &str) -> ChannelConfig {
    ChannelConfig::default()
        .with(ChangeBinding::filtered("*", "conversations", format!("participant1_id=eq.{me}")))
        .with(ChangeBinding::filtered("*", "conversations", format!("participant2_id=eq.{me}")))
}

pub fn profile_channel() -> ChannelConfig {
    ChannelConfig::default().with(ChangeBinding::new("UPDATE", "profiles"))
}

/// Sidebar state: conversations newest first, plus the selection.
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<Conversation>,
    selected: Option<String>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[Conversation] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Replace the whole list with a fresh fetch. The selection survives if
    /// the selected conversation is still present.
    pub fn replace(&mut self, mut items: Vec<Conversation>) {
        // Newest first; never-messaged conversations sink to the bottom.
        items.sort_by(|a, b| b.last_message_timestamp.cmp(&a.last_message_timestamp));
        self.items = items;
        if let Some(sel) = &self.selected {
            if self.get(sel).is_none() {
                self.selected = None;
            }
        }
    }

    pub fn find_existing(&self, me: &str, other: &str) -> Option<&Conversation> {
        self.items.iter().find(|c| c.pairs(me, other))
    }

    /// Put a newly created conversation at the front.
    pub fn insert_front(&mut self, conv: Conversation) {
        self.items.retain(|c| c.id != conv.id);
        self.items.insert(0, conv);
    }

    pub fn select(&mut self, id: &str) -> Option<&Conversation> {
        let found = self.items.iter().find(|c| c.id == id)?;
        self.selected = Some(found.id.clone());
        Some(found)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_deref().and_then(|id| self.get(id))
    }

    /// Patch a profile update into every embedded participant row.
    /// Returns whether anything changed.
    pub fn apply_profile(&mut self, profile: &Profile) -> bool {
        let mut changed = false;
        for conv in &mut self.items {
            for p in [conv.participant1.as_mut(), conv.participant2.as_mut()].into_iter().flatten() {
                if p.id == profile.id {
                    let before = p.clone();
                    p.merge_from(profile);
                    changed |= *p != before;
                }
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::LastMessage;
    use chrono::{TimeZone, Utc};

    fn profile(id: &str, name: &str) -> Profile {
        Profile { id: id.into(), username: Some(name.into()), ..Profile::default() }
    }

    fn conv(id: &str, p1: &str, p2: &str, secs: Option<i64>) -> Conversation {
        Conversation {
            id: id.into(),
            participant1_id: p1.into(),
            participant2_id: p2.into(),
            last_message_id: None,
            last_message_timestamp: secs.map(|s| Utc.timestamp_opt(s, 0).unwrap()),
            created_at: None,
            updated_at: None,
            participant1: Some(profile(p1, p1)),
            participant2: Some(profile(p2, p2)),
            last_message: None,
        }
    }

    fn with_last(mut c: Conversation, sender: &str, text: &str) -> Conversation {
        c.last_message = Some(LastMessage {
            content: Some(text.into()),
            timestamp: Utc.timestamp_opt(100, 0).unwrap(),
            sender_id: sender.into(),
        });
        c
    }

    #[test]
    fn last_seen_only_for_offline_peers() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 15, 0, 0).unwrap();
        let mut bob = profile("u2", "bob");
        assert_eq!(last_seen_caption(&bob, &now), None);
        bob.last_seen = Some(now - chrono::Duration::minutes(5));
        assert_eq!(last_seen_caption(&bob, &now).as_deref(), Some("Last seen 5 minutes ago"));
        bob.is_online = true;
        assert_eq!(last_seen_caption(&bob, &now), None);
    }

    #[test]
    fn other_participant_picks_the_peer() {
        let c = conv("c1", "me", "bob", None);
        assert_eq!(other_participant(&c, "me").unwrap().id, "bob");
        assert_eq!(other_participant(&c, "bob").unwrap().id, "me");
    }

    #[test]
    fn preview_rules() {
        let c = conv("c1", "me", "bob", None);
        assert_eq!(preview(&c, "me"), "No messages yet");

        let empty = with_last(c.clone(), "bob", "");
        assert_eq!(preview(&empty, "me"), "No messages yet");

        let mine = with_last(c.clone(), "me", "see you");
        assert_eq!(preview(&mine, "me"), "You: see you");

        let long_text = "x".repeat(41);
        let long = with_last(c.clone(), "bob", &long_text);
        assert_eq!(preview(&long, "me"), format!("{}...", "x".repeat(40)));

        let exact = with_last(c, "bob", &"é".repeat(40));
        assert_eq!(preview(&exact, "me"), "é".repeat(40));
    }

    #[test]
    fn replace_sorts_newest_first_and_keeps_selection() {
        let mut list = ConversationList::new();
        list.replace(vec![
            conv("old", "me", "a", Some(100)),
            conv("never", "me", "b", None),
            conv("new", "me", "c", Some(200)),
        ]);
        let ids: Vec<&str> = list.items().iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["new", "old", "never"]);

        list.select("old").unwrap();
        list.replace(vec![conv("old", "me", "a", Some(300))]);
        assert_eq!(list.selected().unwrap().id, "old");

        list.replace(vec![conv("new", "me", "c", Some(200))]);
        assert!(list.selected().is_none());
    }

    #[test]
    fn find_existing_in_either_order_and_insert_front() {
        let mut list = ConversationList::new();
        list.replace(vec![conv("c1", "bob", "me", Some(100))]);
        assert_eq!(list.find_existing("me", "bob").unwrap().id, "c1");
        assert!(list.find_existing("me", "carol").is_none());

        list.insert_front(conv("c2", "me", "carol", None));
        list.insert_front(conv("c2", "me", "carol", None));
        assert_eq!(list.items().len(), 2);
        assert_eq!(list.items()[0].id, "c2");
    }

    #[test]
    fn profile_updates_patch_participants() {
        let mut list = ConversationList::new();
        list.replace(vec![conv("c1", "me", "bob", Some(1)), conv("c2", "bob", "carol", Some(2))]);
        let mut bob = profile("bob", "bob");
        bob.is_online = true;
        bob.full_name = Some("Bob B".into());
        assert!(list.apply_profile(&bob));
        assert!(!list.apply_profile(&bob));
        for c in list.items() {
            let p = [c.participant1.as_ref(), c.participant2.as_ref()]
                .into_iter()
                .flatten()
                .find(|p| p.id == "bob")
                .unwrap();
            assert!(p.is_online);
            assert_eq!(p.display_name(), "Bob B");
        }
        assert!(!list.apply_profile(&profile("zed", "zed")));
    }

    #[test]
    fn search_needs_two_chars() {
        assert_eq!(search_term("a"), None);
        assert_eq!(search_term("al"), Some("al"));
        assert_eq!(search_term(""), None);
    }

    #[test]
    fn conversation_channel_has_one_filter_per_side() {
        let config = conversation_channel("u1");
        let filters: Vec<_> = config.bindings.iter().filter_map(|b| b.filter.as_deref()).collect();
        assert_eq!(filters, ["participant1_id=eq.u1", "participant2_id=eq.u1"]);
        assert_eq!(profile_channel().bindings[0].event, "UPDATE");
    }
}
