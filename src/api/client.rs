use crate::api::models::{
    Conversation, Message, MessageType, NewConversation, NewMessage, Profile, ProfileUpdate,
    ProfileUpsert, TypingIndicator,
};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const PROFILE_EMBED: &str = "id,username,full_name,avatar_url,is_online,last_seen";
pub const SENDER_EMBED: &str = "id,username,full_name,avatar_url";
pub const SEARCH_LIMIT: usize = 10;

pub fn conversation_select(with_last_message: bool) -> String {
    let mut select = format!(
        "*,participant1:participant1_id({PROFILE_EMBED}),participant2:participant2_id({PROFILE_EMBED})"
    );
    if with_last_message {
        select.push_str(
            ",last_message:messages!conversations_last_message_id_fkey(content,timestamp,sender_id)",
        );
    }
    select
}

pub fn message_select() -> String {
    format!("*,sender:sender_id({SENDER_EMBED})")
}

/// Quote a value for use inside a PostgREST logic tree such as `or=(...)`,
/// so commas and parentheses in user input stay literal.
pub fn quote_filter_value(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

type Query = Vec<(&'static str, String)>;

pub fn conversations_query(user_id: &str) -> Query {
    vec![
        ("select", conversation_select(true)),
        (
            "or",
            format!("(participant1_id.eq.{user_id},participant2_id.eq.{user_id})"),
        ),
        ("order", "last_message_timestamp.desc".to_string()),
    ]
}

pub fn search_query(term: &str, exclude_id: &str) -> Query {
    let pattern = quote_filter_value(&format!("*{}*", term.trim()));
    vec![
        ("select", "*".to_string()),
        ("id", format!("neq.{exclude_id}")),
        ("or", format!("(username.ilike.{pattern},full_name.ilike.{pattern})")),
        ("limit", SEARCH_LIMIT.to_string()),
    ]
}

pub fn messages_query(conversation_id: &str) -> Query {
    vec![
        ("select", message_select()),
        ("conversation_id", format!("eq.{conversation_id}")),
        ("deleted", "eq.false".to_string()),
        ("order", "timestamp.asc".to_string()),
    ]
}

/// One HTTP client for every platform service. Requests carry the anon key,
/// plus the user's access token once signed in.
#[derive(Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    pub base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .finish()
    }
}

impl ApiClient {
    pub fn new(base_url: &str, anon_key: &str) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            base_url: crate::utils::normalize_url(base_url),
            anon_key: anon_key.to_string(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    pub async fn access_token(&self) -> Option<String> {
        self.access_token.read().await.clone()
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn rest(&self, resource: &str) -> String {
        self.endpoint(&format!("rest/v1/{resource}"))
    }

    pub(crate) async fn with_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .await
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(req: reqwest::RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_api_body(status.as_u16(), &body));
        }
        Ok(resp.json::<T>().await?)
    }

    pub(crate) async fn send_empty(req: reqwest::RequestBuilder) -> Result<()> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::from_api_body(status.as_u16(), &body));
        }
        Ok(())
    }

    pub async fn profile(&self, id: &str) -> Result<Option<Profile>> {
        let req = self
            .http
            .get(self.rest("profiles"))
            .query(&[("select", "*".to_string()), ("id", format!("eq.{id}"))]);
        let rows: Vec<Profile> = Self::send_json(self.with_auth(req).await).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn upsert_profile(&self, profile: &ProfileUpsert) -> Result<()> {
        let req = self
            .http
            .post(self.rest("profiles"))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(profile);
        log::debug!("upserting profile {}", profile.id);
        Self::send_empty(self.with_auth(req).await).await
    }

    pub async fn update_profile(&self, id: &str, update: &ProfileUpdate) -> Result<()> {
        let req = self
            .http
            .patch(self.rest("profiles"))
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=minimal")
            .json(update);
        Self::send_empty(self.with_auth(req).await).await
    }

    pub async fn set_presence(&self, id: &str, online: bool, now: DateTime<Utc>) -> Result<()> {
        log::debug!("presence {id} -> {}", if online { "online" } else { "offline" });
        self.update_profile(id, &ProfileUpdate::presence(online, now)).await
    }

    pub async fn username_available(&self, desired: &str) -> Result<bool> {
        let req = self
            .http
            .post(self.rest("rpc/check_username_availability"))
            .json(&serde_json::json!({ "desired_username": desired }));
        Self::send_json(self.with_auth(req).await).await
    }

    pub async fn search_profiles(&self, term: &str, exclude_id: &str) -> Result<Vec<Profile>> {
        let req = self
            .http
            .get(self.rest("profiles"))
            .query(&search_query(term, exclude_id));
        Self::send_json(self.with_auth(req).await).await
    }

    pub async fn conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let req = self
            .http
            .get(self.rest("conversations"))
            .query(&conversations_query(user_id));
        let list: Vec<Conversation> = Self::send_json(self.with_auth(req).await).await?;
        log::debug!("fetched {} conversations", list.len());
        Ok(list)
    }

    pub async fn create_conversation(&self, me: &str, other: &str) -> Result<Conversation> {
        let body = NewConversation {
            participant1_id: me.to_string(),
            participant2_id: other.to_string(),
        };
        let req = self
            .http
            .post(self.rest("conversations"))
            .query(&[("select", conversation_select(false))])
            .header("Prefer", "return=representation")
            .json(&body);
        let rows: Vec<Conversation> = Self::send_json(self.with_auth(req).await).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| Error::Api { status: 200, message: "insert returned no row".into() })
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let req = self
            .http
            .get(self.rest("messages"))
            .query(&messages_query(conversation_id));
        Self::send_json(self.with_auth(req).await).await
    }

    pub async fn message(&self, id: &str) -> Result<Option<Message>> {
        let req = self
            .http
            .get(self.rest("messages"))
            .query(&[("select", message_select()), ("id", format!("eq.{id}"))]);
        let rows: Vec<Message> = Self::send_json(self.with_auth(req).await).await?;
        Ok(rows.into_iter().next())
    }

    pub async fn send_message(&self, conversation_id: &str, sender_id: &str, content: &str) -> Result<()> {
        let body = NewMessage {
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
        };
        let req = self
            .http
            .post(self.rest("messages"))
            .header("Prefer", "return=minimal")
            .json(&body);
        Self::send_empty(self.with_auth(req).await).await
    }

    pub async fn set_typing(&self, conversation_id: &str, user_id: &str, is_typing: bool) -> Result<()> {
        let body = TypingIndicator {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
            is_typing,
            updated_at: Some(Utc::now()),
        };
        let req = self
            .http
            .post(self.rest("typing_indicators"))
            .query(&[("on_conflict", "conversation_id,user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&body);
        Self::send_empty(self.with_auth(req).await).await
    }
}
