//! Sign-in against the platform's auth service.
//!
//! Desktop sign-in uses the PKCE flow: the browser is sent to the provider,
//! the provider redirects to a loopback listener with a one-time `code`, and
//! the code is exchanged together with the verifier for a session.

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;

use crate::api::client::ApiClient;
use crate::error::{Error, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use url::Url;

/// Sessions closer than this to expiry are refreshed before use.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Session {
    pub fn expires_soon(&self, now_secs: i64) -> bool {
        self.expires_at - now_secs < EXPIRY_MARGIN_SECS
    }

    /// Time left until `expires_soon` turns true.
    pub fn refresh_in(&self, now_secs: i64) -> Duration {
        let secs = self.expires_at - EXPIRY_MARGIN_SECS - now_secs + 1;
        Duration::from_secs(secs.max(0) as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct UserMetadata {
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
    pub picture: Option<String>,
    pub provider_id: Option<String>,
}

impl UserMetadata {
    pub fn preferred_full_name(&self) -> Option<String> {
        self.full_name.clone().or_else(|| self.name.clone())
    }

    pub fn preferred_avatar(&self) -> Option<String> {
        self.avatar_url.clone().or_else(|| self.picture.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<AuthUser>,
}

impl TokenResponse {
    fn into_session(self, now_secs: i64) -> (Session, Option<AuthUser>) {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| now_secs + self.expires_in.unwrap_or(3600));
        let session = Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        };
        (session, self.user)
    }
}

#[derive(Clone)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
}

impl Pkce {
    pub fn generate() -> Self {
        let verifier: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(64)
            .map(char::from)
            .collect();
        Self::from_verifier(verifier)
    }

    pub fn from_verifier(verifier: String) -> Self {
        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = URL_SAFE_NO_PAD.encode(digest);
        Self { verifier, challenge }
    }
}

pub fn redirect_uri(port: u16) -> String {
    format!("http://127.0.0.1:{port}/callback")
}

pub fn authorize_url(base_url: &str, provider: &str, redirect_to: &str, challenge: &str) -> Result<Url> {
    let base = crate::utils::normalize_url(base_url);
    let mut url = Url::parse(&format!("{base}/auth/v1/authorize"))?;
    url.query_pairs_mut()
        .append_pair("provider", provider)
        .append_pair("redirect_to", redirect_to)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "s256");
    Ok(url)
}

/// Outcome of one request hitting the loopback listener.
#[derive(Debug, PartialEq)]
pub enum Callback {
    Code(String),
    Denied(String),
    /// A request without a code or an error.
    Ignored,
}

/// Query string of the provider's redirect.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    pub fn outcome(self) -> Callback {
        match (self.code, self.error_description.or(self.error)) {
            (_, Some(err)) => Callback::Denied(err),
            (Some(code), None) if !code.is_empty() => Callback::Code(code),
            _ => Callback::Ignored,
        }
    }
}

const CALLBACK_PAGE: &str = "<!doctype html><html><body style=\"font-family:sans-serif\">\
<h2>ChatApp</h2><p>You can close this window and return to the app.</p></body></html>";

type CallbackTx = mpsc::UnboundedSender<Result<String>>;

async fn callback(
    State(tx): State<CallbackTx>,
    Query(params): Query<CallbackParams>,
) -> (StatusCode, Html<&'static str>) {
    let outcome = match params.outcome() {
        Callback::Code(code) => Ok(code),
        Callback::Denied(reason) => Err(Error::Auth(reason)),
        Callback::Ignored => return (StatusCode::BAD_REQUEST, Html("")),
    };
    let _ = tx.send(outcome);
    (StatusCode::OK, Html(CALLBACK_PAGE))
}

/// Accept redirects on `127.0.0.1:port` until one carries a code or an error.
pub async fn await_callback(port: u16) -> Result<String> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    serve_callback(listener).await
}

/// Serve `/callback` on `listener` and shut down after the first code or
/// error.
pub async fn serve_callback(listener: TcpListener) -> Result<String> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let app = Router::new().route("/callback", get(callback)).with_state(tx);
    log::info!("waiting for OAuth redirect on {}", listener.local_addr()?);

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    tokio::spawn(async move {
        if let Err(e) = server.await {
            log::warn!("callback listener failed: {e}");
        }
    });

    let outcome = rx
        .recv()
        .await
        .unwrap_or_else(|| Err(Error::Auth("callback listener stopped".into())));
    let _ = stop_tx.send(());
    outcome
}

impl ApiClient {
    pub async fn exchange_code(&self, code: &str, verifier: &str) -> Result<(Session, Option<AuthUser>)> {
        let req = self
            .http
            .post(self.endpoint("auth/v1/token"))
            .query(&[("grant_type", "pkce")])
            .header("apikey", self.anon_key())
            .json(&serde_json::json!({ "auth_code": code, "code_verifier": verifier }));
        let resp: TokenResponse = Self::send_json(req).await?;
        log::info!("signed in via OAuth");
        Ok(resp.into_session(Utc::now().timestamp()))
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let req = self
            .http
            .post(self.endpoint("auth/v1/token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", self.anon_key())
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let resp: TokenResponse = Self::send_json(req).await?;
        log::debug!("session refreshed");
        Ok(resp.into_session(Utc::now().timestamp()).0)
    }

    pub async fn auth_user(&self, access_token: &str) -> Result<AuthUser> {
        let req = self
            .http
            .get(self.endpoint("auth/v1/user"))
            .header("apikey", self.anon_key())
            .bearer_auth(access_token);
        Self::send_json(req).await
    }

    pub async fn sign_out(&self, access_token: &str) -> Result<()> {
        let req = self
            .http
            .post(self.endpoint("auth/v1/logout"))
            .header("apikey", self.anon_key())
            .bearer_auth(access_token);
        Self::send_empty(req).await
    }
}
