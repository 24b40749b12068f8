//! Glue between the platform clients and the UI.
//!
//! `ChatService` owns the HTTP client, the persisted settings, the local
//! cache and the realtime connection. It is shared behind an `Arc`; no std
//! lock is held across an `.await`. While realtime is connected a background
//! task refreshes the access token shortly before it expires.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

use crate::api::auth::{self, AuthUser, Pkce, Session};
use crate::api::bucket::{avatar_file_name, content_type_for, stored_avatar_name};
use crate::api::client::ApiClient;
use crate::api::events::{ChangeKind, PostgresChange};
use crate::api::models::{Conversation, Message, Profile, TypingIndicator};
use crate::app::AppState;
use crate::chat::conversations::{self, ConversationList, CONVERSATIONS_TOPIC, PROFILES_TOPIC};
use crate::chat::profile::ProfileDraft;
use crate::chat::session::{Phase, SessionState};
use crate::chat::thread;
use crate::chat::username::UsernameForm;
use crate::error::{Error, Result};
use crate::realtime::{RealtimeClient, RealtimeConfig, RealtimeEvent};
use crate::storage::Cache;

/// What the UI hears about from the realtime connection.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Something changed in one of my conversations; refetch the list.
    ConversationsChanged,
    ProfileChanged(Profile),
    MessageArrived(Message),
    Typing(TypingIndicator),
    /// An indicator row was deleted. `user_id` is known only when the delete
    /// carried it.
    TypingCleared { conversation_id: String, user_id: Option<String> },
    Connection(bool),
    Error(String),
}

#[derive(Debug, Clone)]
pub enum Routed {
    Event(ChatEvent),
    /// Pushed message rows lack the sender embed, so the full row is fetched.
    FetchMessage(String),
}

pub fn route_change(change: &PostgresChange) -> Option<Routed> {
    match (change.table.as_str(), change.kind) {
        ("conversations", _) => Some(Routed::Event(ChatEvent::ConversationsChanged)),
        ("profiles", ChangeKind::Update) => match change.record_as::<Profile>() {
            Ok(profile) => Some(Routed::Event(ChatEvent::ProfileChanged(profile))),
            Err(e) => {
                log::debug!("unreadable profile change: {e}");
                None
            }
        },
        ("messages", ChangeKind::Insert) => {
            change.record_str("id").map(|id| Routed::FetchMessage(id.to_string()))
        }
        ("typing_indicators", ChangeKind::Insert | ChangeKind::Update) => {
            match change.record_as::<TypingIndicator>() {
                Ok(indicator) => Some(Routed::Event(ChatEvent::Typing(indicator))),
                Err(e) => {
                    log::debug!("unreadable typing change: {e}");
                    None
                }
            }
        }
        ("typing_indicators", ChangeKind::Delete) => {
            let conversation_id = change
                .old_str("conversation_id")
                .or_else(|| thread::typing_topic_conversation(&change.topic))?;
            Some(Routed::Event(ChatEvent::TypingCleared {
                conversation_id: conversation_id.to_string(),
                user_id: change.old_str("user_id").map(str::to_string),
            }))
        }
        _ => None,
    }
}

/// Channels the server closes are rejoined this many times before giving up.
const MAX_REJOIN_ATTEMPTS: u32 = 5;
/// Wait before retrying a background refresh that failed.
const REFRESH_RETRY: Duration = Duration::from_secs(30);

fn rejoin_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.clamp(1, 5))
}

pub struct ChatService {
    api: ApiClient,
    config: Mutex<AppState>,
    config_path: Option<PathBuf>,
    state: Mutex<SessionState>,
    cache: Option<Mutex<Cache>>,
    realtime: Mutex<Option<RealtimeClient>>,
    refresher: Mutex<Option<JoinHandle<()>>>,
    refreshing: tokio::sync::Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChatService {
    /// `config_path` of `None` saves to the default location.
    pub fn new(config: AppState, config_path: Option<PathBuf>, cache: Option<Cache>) -> Result<Self> {
        if !config.is_configured() {
            return Err(Error::Config(
                "set supabase_url and anon_key (or SUPABASE_URL / SUPABASE_ANON_KEY)".into(),
            ));
        }
        let api = ApiClient::new(&config.supabase_url, &config.anon_key)?;
        Ok(Self {
            api,
            config: Mutex::new(config),
            config_path,
            state: Mutex::new(SessionState::default()),
            cache: cache.map(Mutex::new),
            realtime: Mutex::new(None),
            refresher: Mutex::new(None),
            refreshing: tokio::sync::Mutex::new(()),
        })
    }

    /// Default settings file and cache. A cache that fails to open is
    /// skipped.
    pub fn from_default_config() -> Result<Arc<Self>> {
        let cache = match Cache::open_default() {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!("conversation cache unavailable: {e}");
                None
            }
        };
        Ok(Arc::new(Self::new(AppState::load(), None, cache)?))
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn state(&self) -> SessionState {
        lock(&self.state).clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.state).phase()
    }

    pub fn me(&self) -> Result<String> {
        lock(&self.state)
            .user_id()
            .map(str::to_string)
            .ok_or_else(|| Error::Auth("not signed in".into()))
    }

    pub fn profile(&self) -> Option<Profile> {
        lock(&self.state).profile.clone()
    }

    fn session(&self) -> Option<Session> {
        lock(&self.config).session.clone()
    }

    fn persist_session(&self, session: Option<Session>) {
        let snapshot = {
            let mut config = lock(&self.config);
            config.session = session;
            config.clone()
        };
        let saved = match &self.config_path {
            Some(path) => snapshot.save_to(path),
            None => snapshot.save(),
        };
        if let Err(e) = saved {
            log::warn!("failed to persist session: {e}");
        }
    }

    // ---- sign-in ---------------------------------------------------------

    /// Provider URL to open in the browser, plus the PKCE pair to finish with.
    pub fn authorize(&self) -> Result<(Url, Pkce)> {
        let config = lock(&self.config).clone();
        let pkce = Pkce::generate();
        let redirect = auth::redirect_uri(config.callback_port);
        let url = auth::authorize_url(&self.api.base_url, &config.oauth_provider, &redirect, &pkce.challenge)?;
        Ok((url, pkce))
    }

    pub async fn wait_for_code(&self) -> Result<String> {
        let port = lock(&self.config).callback_port;
        auth::await_callback(port).await
    }

    pub async fn finish_sign_in(&self, code: &str, pkce: &Pkce) -> Result<Phase> {
        let (session, user) = self.api.exchange_code(code, &pkce.verifier).await?;
        self.persist_session(Some(session.clone()));
        self.start_session(session, user).await
    }

    /// Resume the persisted session, if any.
    pub async fn restore(&self) -> Result<Phase> {
        let Some(session) = self.session() else {
            lock(&self.state).clear();
            return Ok(Phase::SignedOut);
        };
        match self.start_session(session, None).await {
            Ok(phase) => Ok(phase),
            Err(e) if e.is_unauthorized() || matches!(e, Error::Auth(_) | Error::Api { status: 400 | 403, .. }) => {
                log::info!("stored session rejected, signing out locally: {e}");
                self.persist_session(None);
                self.api.set_access_token(None).await;
                lock(&self.state).clear();
                Ok(Phase::SignedOut)
            }
            Err(e) => {
                lock(&self.state).loading = false;
                Err(e)
            }
        }
    }

    async fn start_session(&self, session: Session, user: Option<AuthUser>) -> Result<Phase> {
        let session = self.fresh_session(session).await?;
        self.api.set_access_token(Some(session.access_token.clone())).await;
        let user = match user {
            Some(user) => user,
            None => self.api.auth_user(&session.access_token).await?,
        };
        log::info!("session started for {}", user.id);
        let user_id = user.id.clone();
        lock(&self.state).user = Some(user);

        self.refresh_profile().await?;
        if let Err(e) = self.api.set_presence(&user_id, true, Utc::now()).await {
            log::warn!("failed to mark online: {e}");
        }
        let mut state = lock(&self.state);
        state.loading = false;
        Ok(state.phase())
    }

    async fn fresh_session(&self, session: Session) -> Result<Session> {
        if !session.expires_soon(Utc::now().timestamp()) {
            return Ok(session);
        }
        let renewed = self.api.refresh_session(&session.refresh_token).await?;
        self.persist_session(Some(renewed.clone()));
        Ok(renewed)
    }

    /// Refresh the access token when it is about to lapse, and hand the new
    /// one to the realtime socket.
    pub async fn ensure_fresh_token(&self) -> Result<()> {
        let _refreshing = self.refreshing.lock().await;
        let Some(session) = self.session() else {
            return Ok(());
        };
        if !session.expires_soon(Utc::now().timestamp()) {
            return Ok(());
        }
        let renewed = self.fresh_session(session).await?;
        self.api.set_access_token(Some(renewed.access_token.clone())).await;
        let realtime = lock(&self.realtime).clone();
        if let Some(realtime) = realtime {
            realtime.set_auth(Some(renewed.access_token)).await;
        }
        Ok(())
    }

    pub async fn refresh_profile(&self) -> Result<Option<Profile>> {
        let id = self.me()?;
        let profile = self.api.profile(&id).await?;
        lock(&self.state).profile = profile.clone();
        Ok(profile)
    }

    pub async fn go_offline(&self) {
        let Ok(id) = self.me() else { return };
        if let Err(e) = self.api.set_presence(&id, false, Utc::now()).await {
            log::warn!("failed to mark offline: {e}");
        }
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.go_offline().await;
        if let Some(session) = self.session() {
            if let Err(e) = self.api.sign_out(&session.access_token).await {
                log::warn!("logout request failed: {e}");
            }
        }
        if let Some(refresher) = lock(&self.refresher).take() {
            refresher.abort();
        }
        let realtime = lock(&self.realtime).take();
        if let Some(realtime) = realtime {
            realtime.disconnect().await;
        }
        self.api.set_access_token(None).await;
        self.persist_session(None);
        lock(&self.state).clear();
        if let Some(cache) = &self.cache {
            lock(cache).clear()?;
        }
        log::info!("signed out");
        Ok(())
    }

    // ---- profile ---------------------------------------------------------

    pub async fn check_username(&self, name: &str) -> Result<bool> {
        self.api.username_available(name.trim()).await
    }

    pub async fn create_profile(&self, form: &UsernameForm, uploaded_avatar: Option<&str>) -> Result<Phase> {
        if !form.can_submit() {
            return Err(Error::Validation("choose an available username first".into()));
        }
        let user = lock(&self.state)
            .user
            .clone()
            .ok_or_else(|| Error::Auth("not signed in".into()))?;
        self.ensure_fresh_token().await?;
        self.api.upsert_profile(&form.profile_for(&user, uploaded_avatar)).await?;
        self.refresh_profile().await?;
        Ok(self.phase())
    }

    pub async fn save_profile(&self, draft: &ProfileDraft) -> Result<Option<Profile>> {
        let id = self.me()?;
        self.ensure_fresh_token().await?;
        self.api.update_profile(&id, &draft.to_update()).await?;
        self.refresh_profile().await
    }

    /// Upload an avatar image and return its public URL. When `replacing`
    /// points at a stored avatar, that object is deleted first.
    pub async fn upload_avatar(&self, file_name: &str, bytes: Vec<u8>, replacing: Option<&str>) -> Result<String> {
        let id = self.me()?;
        let bucket = lock(&self.config).avatar_bucket.clone();
        self.ensure_fresh_token().await?;
        if let Some(old) = replacing.and_then(|url| stored_avatar_name(url, &bucket)) {
            if let Err(e) = self.api.remove(&bucket, &[old]).await {
                log::warn!("could not delete previous avatar: {e}");
            }
        }
        let name = avatar_file_name(&id, Utc::now().timestamp_millis(), file_name);
        self.api.upload(&bucket, &name, bytes, content_type_for(file_name)).await?;
        Ok(self.api.public_url(&bucket, &name))
    }

    pub async fn search(&self, query: &str) -> Result<Vec<Profile>> {
        let Some(term) = conversations::search_term(query) else {
            return Ok(Vec::new());
        };
        let me = self.me()?;
        self.api.search_profiles(term, &me).await
    }

    // ---- conversations ---------------------------------------------------

    pub fn cached_conversations(&self) -> Vec<Conversation> {
        let (Some(cache), Ok(me)) = (&self.cache, self.me()) else {
            return Vec::new();
        };
        lock(cache).conversations(&me, None).unwrap_or_else(|e| {
            log::warn!("cache read failed: {e}");
            Vec::new()
        })
    }

    pub async fn conversations(&self) -> Result<Vec<Conversation>> {
        let me = self.me()?;
        self.ensure_fresh_token().await?;
        let list = self.api.conversations(&me).await?;
        if let Some(cache) = &self.cache {
            if let Err(e) = lock(cache).upsert_conversations(&me, &list) {
                log::warn!("cache write failed: {e}");
            }
        }
        Ok(list)
    }

    /// Returns the conversation with `other` and whether it was just created.
    pub async fn create_conversation(&self, list: &ConversationList, other: &str) -> Result<(Conversation, bool)> {
        let me = self.me()?;
        if let Some(existing) = list.find_existing(&me, other) {
            return Ok((existing.clone(), false));
        }
        self.ensure_fresh_token().await?;
        let conv = self.api.create_conversation(&me, other).await?;
        log::info!("started conversation {}", conv.id);
        Ok((conv, true))
    }

    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.ensure_fresh_token().await?;
        self.api.messages(conversation_id).await
    }

    pub async fn send_message(&self, conversation_id: &str, content: &str) -> Result<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::Validation("message is empty".into()));
        }
        let me = self.me()?;
        self.ensure_fresh_token().await?;
        self.api.send_message(conversation_id, &me, content).await
    }

    pub async fn set_typing(&self, conversation_id: &str, is_typing: bool) -> Result<()> {
        let me = self.me()?;
        self.ensure_fresh_token().await?;
        self.api.set_typing(conversation_id, &me, is_typing).await
    }

    // ---- realtime --------------------------------------------------------

    /// A pushed message row, fetched with its sender.
    pub async fn fetch_message(&self, id: &str) -> Result<Option<Message>> {
        self.ensure_fresh_token().await?;
        self.api.message(id).await
    }

    /// Open the socket, join the list-level channels and start translating
    /// changes and refreshing the token. Must be called inside a tokio
    /// runtime.
    pub async fn connect_realtime(self: &Arc<Self>) -> Result<mpsc::Receiver<ChatEvent>> {
        let me = self.me()?;
        if let Err(e) = self.ensure_fresh_token().await {
            log::warn!("token refresh before connecting failed: {e}");
        }
        let token = self.session().map(|s| s.access_token);
        let config = RealtimeConfig::new(&self.api.base_url, self.api.anon_key(), token)?;
        let (client, events) = RealtimeClient::connect(config);

        client.subscribe(CONVERSATIONS_TOPIC, conversations::conversation_channel(&me)).await;
        client.subscribe(PROFILES_TOPIC, conversations::profile_channel()).await;

        let previous = lock(&self.realtime).replace(client);
        if let Some(previous) = previous {
            previous.disconnect().await;
        }

        let refresher = tokio::spawn(refresh_loop(Arc::downgrade(self)));
        if let Some(previous) = lock(&self.refresher).replace(refresher) {
            previous.abort();
        }

        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(pump(Arc::downgrade(self), events, tx));
        Ok(rx)
    }

    /// Join `topic` again after the server closed it, with a fresh token.
    async fn rejoin(&self, topic: &str) {
        if let Err(e) = self.ensure_fresh_token().await {
            log::warn!("token refresh before rejoining {topic} failed: {e}");
        }
        let realtime = lock(&self.realtime).clone();
        if let Some(realtime) = realtime {
            realtime.rejoin(topic).await;
        }
    }

    pub async fn watch_conversation(&self, conversation_id: &str) {
        let realtime = lock(&self.realtime).clone();
        if let Some(realtime) = realtime {
            realtime
                .subscribe(&thread::messages_topic(conversation_id), thread::message_channel(conversation_id))
                .await;
            realtime
                .subscribe(&thread::typing_topic(conversation_id), thread::typing_channel(conversation_id))
                .await;
        }
    }

    pub async fn unwatch_conversation(&self, conversation_id: &str) {
        let realtime = lock(&self.realtime).clone();
        if let Some(realtime) = realtime {
            realtime.unsubscribe(&thread::messages_topic(conversation_id)).await;
            realtime.unsubscribe(&thread::typing_topic(conversation_id)).await;
        }
    }
}

async fn refresh_loop(service: Weak<ChatService>) {
    loop {
        let wait = match service.upgrade().and_then(|svc| svc.session()) {
            Some(session) => session.refresh_in(Utc::now().timestamp()).max(Duration::from_secs(1)),
            None => break,
        };
        tokio::time::sleep(wait).await;
        let Some(svc) = service.upgrade() else { break };
        if let Err(e) = svc.ensure_fresh_token().await {
            log::warn!("background token refresh failed: {e}");
            drop(svc);
            tokio::time::sleep(REFRESH_RETRY).await;
        }
    }
    log::debug!("token refresher stopped");
}

async fn pump(service: Weak<ChatService>, mut events: mpsc::Receiver<RealtimeEvent>, tx: mpsc::Sender<ChatEvent>) {
    let mut rejoins: HashMap<String, u32> = HashMap::new();
    while let Some(event) = events.recv().await {
        let Some(svc) = service.upgrade() else { break };
        let out = match event {
            RealtimeEvent::Connected => ChatEvent::Connection(true),
            RealtimeEvent::Disconnected => ChatEvent::Connection(false),
            RealtimeEvent::ChannelJoined { topic } => {
                log::debug!("joined {topic}");
                rejoins.remove(&topic);
                continue;
            }
            RealtimeEvent::ChannelError { topic, message } => {
                log::warn!("channel {topic} failed: {message}");
                let attempt = rejoins.entry(topic.clone()).or_insert(0);
                *attempt += 1;
                if *attempt > MAX_REJOIN_ATTEMPTS {
                    if *attempt == MAX_REJOIN_ATTEMPTS + 1 {
                        ChatEvent::Error(format!("Live updates stopped for {topic}: {message}"))
                    } else {
                        continue;
                    }
                } else {
                    let delay = rejoin_delay(*attempt);
                    let weak = service.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(svc) = weak.upgrade() {
                            svc.rejoin(&topic).await;
                        }
                    });
                    continue;
                }
            }
            RealtimeEvent::Error(message) => ChatEvent::Error(message),
            RealtimeEvent::Change(change) => match route_change(&change) {
                Some(Routed::Event(event)) => event,
                Some(Routed::FetchMessage(id)) => match svc.fetch_message(&id).await {
                    Ok(Some(message)) => ChatEvent::MessageArrived(message),
                    Ok(None) => continue,
                    Err(e) => ChatEvent::Error(format!("could not load new message: {e}")),
                },
                None => continue,
            },
        };
        drop(svc);
        if tx.send(out).await.is_err() {
            break;
        }
    }
    log::debug!("realtime pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(table: &str, kind: &str, record: serde_json::Value) -> PostgresChange {
        change_on("topic", table, kind, record, json!({}))
    }

    fn change_on(
        topic: &str,
        table: &str,
        kind: &str,
        record: serde_json::Value,
        old_record: serde_json::Value,
    ) -> PostgresChange {
        PostgresChange::from_payload(
            topic,
            &json!({"data": {
                "schema": "public", "table": table, "type": kind,
                "record": record, "old_record": old_record,
                "commit_timestamp": "2024-05-01T10:00:00Z"
            }}),
        )
        .unwrap()
    }

    #[test]
    fn routes_each_table() {
        let c = change("conversations", "UPDATE", json!({"id": "c1"}));
        assert!(matches!(route_change(&c), Some(Routed::Event(ChatEvent::ConversationsChanged))));

        let p = change("profiles", "UPDATE", json!({"id": "u2", "username": "bob", "is_online": true}));
        match route_change(&p) {
            Some(Routed::Event(ChatEvent::ProfileChanged(profile))) => {
                assert_eq!(profile.id, "u2");
                assert!(profile.is_online);
            }
            other => panic!("unexpected {other:?}"),
        }

        let m = change("messages", "INSERT", json!({"id": "m1", "conversation_id": "c1"}));
        assert!(matches!(route_change(&m), Some(Routed::FetchMessage(id)) if id == "m1"));

        let t = change(
            "typing_indicators",
            "UPDATE",
            json!({"conversation_id": "c1", "user_id": "u2", "is_typing": true}),
        );
        match route_change(&t) {
            Some(Routed::Event(ChatEvent::Typing(ind))) => assert!(ind.is_typing),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ignores_irrelevant_changes() {
        assert!(route_change(&change("messages", "UPDATE", json!({"id": "m1"}))).is_none());
        assert!(route_change(&change("profiles", "INSERT", json!({"id": "u3"}))).is_none());
        assert!(route_change(&change("typing_indicators", "DELETE", json!({}))).is_none());
        assert!(route_change(&change("other", "INSERT", json!({}))).is_none());
    }

    #[test]
    fn deleted_typing_rows_clear_the_flag() {
        let d = change_on(
            "typing-c1",
            "typing_indicators",
            "DELETE",
            json!({}),
            json!({"conversation_id": "c9", "user_id": "u2"}),
        );
        match route_change(&d) {
            Some(Routed::Event(ChatEvent::TypingCleared { conversation_id, user_id })) => {
                assert_eq!(conversation_id, "c9");
                assert_eq!(user_id.as_deref(), Some("u2"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let d = change_on("typing-c1", "typing_indicators", "DELETE", json!({}), json!({"id": 4}));
        match route_change(&d) {
            Some(Routed::Event(ChatEvent::TypingCleared { conversation_id, user_id })) => {
                assert_eq!(conversation_id, "c1");
                assert!(user_id.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rejoin_backs_off() {
        assert_eq!(rejoin_delay(1), Duration::from_secs(2));
        assert_eq!(rejoin_delay(3), Duration::from_secs(8));
        assert_eq!(rejoin_delay(MAX_REJOIN_ATTEMPTS), Duration::from_secs(32));
        assert_eq!(rejoin_delay(40), Duration::from_secs(32));
    }

    fn service_at(base_url: &str, dir: &tempfile::TempDir) -> ChatService {
        let config = AppState {
            supabase_url: base_url.into(),
            anon_key: "anon".into(),
            ..AppState::default()
        };
        ChatService::new(config, Some(dir.path().join("chatapp.toml")), None).unwrap()
    }

    /// Serves `rows` for every `GET /rest/v1/messages`.
    async fn messages_endpoint(rows: serde_json::Value) -> String {
        let app = axum::Router::new().route(
            "/rest/v1/messages",
            axum::routing::get(move || {
                let rows = rows.clone();
                async move { axum::Json(rows) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn pump_fetches_pushed_messages_and_forwards_events() {
        let base = messages_endpoint(json!([{
            "id": "m1", "conversation_id": "c1", "sender_id": "u2", "content": "hi",
            "timestamp": "2024-05-01T10:00:00Z",
            "sender": {"id": "u2", "username": "bob"}
        }]))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let svc = Arc::new(service_at(&base, &dir));

        let (events_tx, events_rx) = mpsc::channel(8);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(pump(Arc::downgrade(&svc), events_rx, tx));

        events_tx.send(RealtimeEvent::Connected).await.unwrap();
        events_tx
            .send(RealtimeEvent::ChannelJoined { topic: "messages-c1".into() })
            .await
            .unwrap();
        events_tx
            .send(RealtimeEvent::Change(change_on(
                "messages-c1",
                "messages",
                "INSERT",
                json!({"id": "m1", "conversation_id": "c1"}),
                json!({}),
            )))
            .await
            .unwrap();
        events_tx
            .send(RealtimeEvent::Change(change("conversations", "UPDATE", json!({"id": "c1"}))))
            .await
            .unwrap();

        assert!(matches!(rx.recv().await, Some(ChatEvent::Connection(true))));
        match rx.recv().await {
            Some(ChatEvent::MessageArrived(message)) => {
                assert_eq!(message.id, "m1");
                assert_eq!(message.text(), "hi");
                assert_eq!(message.sender.and_then(|p| p.username).as_deref(), Some("bob"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(rx.recv().await, Some(ChatEvent::ConversationsChanged)));

        drop(svc);
        events_tx.send(RealtimeEvent::Disconnected).await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    fn service(dir: &tempfile::TempDir) -> ChatService {
        let config = AppState {
            supabase_url: "https://abc.supabase.co".into(),
            anon_key: "anon".into(),
            ..AppState::default()
        };
        let cache = Cache::open_in_memory().unwrap();
        ChatService::new(config, Some(dir.path().join("chatapp.toml")), Some(cache)).unwrap()
    }

    #[test]
    fn unconfigured_service_is_rejected() {
        assert!(matches!(ChatService::new(AppState::default(), None, None), Err(Error::Config(_))));
    }

    #[test]
    fn authorize_points_at_loopback() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        let (url, pkce) = svc.authorize().unwrap();
        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(query.contains(&("provider".into(), "google".into())));
        assert!(query.contains(&("redirect_to".into(), "http://127.0.0.1:54321/callback".into())));
        assert!(query.contains(&("code_challenge".into(), pkce.challenge.clone())));
    }

    #[tokio::test]
    async fn restore_without_session_is_signed_out() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        assert_eq!(svc.phase(), Phase::Loading);
        assert_eq!(svc.restore().await.unwrap(), Phase::SignedOut);
        assert!(svc.cached_conversations().is_empty());
    }

    #[tokio::test]
    async fn local_validation_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(&dir);
        assert!(svc.search("a").await.unwrap().is_empty());
        assert!(matches!(svc.send_message("c1", "   ").await, Err(Error::Validation(_))));
        assert!(matches!(svc.conversations().await, Err(Error::Auth(_))));
        assert!(matches!(
            svc.create_profile(&UsernameForm::new(), None).await,
            Err(Error::Validation(_))
        ));
    }
}
