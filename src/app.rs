use crate::api::auth::Session;
use crate::error::{Error, Result};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_AVATAR_BUCKET: &str = "avatars";
pub const DEFAULT_OAUTH_PROVIDER: &str = "google";
pub const DEFAULT_CALLBACK_PORT: u16 = 54321;

fn default_bucket() -> String {
    DEFAULT_AVATAR_BUCKET.to_string()
}

fn default_provider() -> String {
    DEFAULT_OAUTH_PROVIDER.to_string()
}

fn default_port() -> u16 {
    DEFAULT_CALLBACK_PORT
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub supabase_url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_bucket")]
    pub avatar_bucket: String,
    #[serde(default = "default_provider")]
    pub oauth_provider: String,
    #[serde(default = "default_port")]
    pub callback_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            anon_key: String::new(),
            avatar_bucket: default_bucket(),
            oauth_provider: default_provider(),
            callback_port: default_port(),
            session: None,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("supabase_url", &self.supabase_url)
            .field("anon_key", &"[REDACTED]")
            .field("avatar_bucket", &self.avatar_bucket)
            .field("oauth_provider", &self.oauth_provider)
            .field("callback_port", &self.callback_port)
            .field("session", &self.session.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    // TOML is the canonical format. An older JSON state file is converted on first load.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("chatapp.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "ChatApp")?;
        Some(proj.config_dir().join("state.json"))
    }

    /// Load from the default location, then apply environment overrides.
    /// Never fails: a broken file is logged and replaced by defaults.
    pub fn load() -> Self {
        let mut state = Self::load_default_file();
        state.apply_env(|key| std::env::var(key).ok());
        state
    }

    fn load_default_file() -> Self {
        match Self::toml_path() {
            Some(path) => Self::load_or_migrate(&path, Self::legacy_json_path().as_deref()),
            None => Self::new(),
        }
    }

    /// Read `toml_path`; when it does not exist, convert `legacy` (an older
    /// JSON state file) and write the result to `toml_path`.
    pub fn load_or_migrate(toml_path: &Path, legacy: Option<&Path>) -> Self {
        match Self::load_from(toml_path) {
            Ok(state) => return state,
            Err(Error::ConfigNotFound(_)) => {}
            Err(e) => log::warn!("ignoring unreadable config {}: {e}", toml_path.display()),
        }

        if let Some(legacy) = legacy {
            if let Ok(bytes) = fs::read(legacy) {
                match serde_json::from_slice::<AppState>(&bytes) {
                    Ok(state) => {
                        log::info!("migrating legacy state from {}", legacy.display());
                        if let Err(e) = state.save_to(toml_path) {
                            log::warn!("failed to write migrated config: {e}");
                        }
                        return state;
                    }
                    Err(e) => log::warn!("ignoring legacy state {}: {e}", legacy.display()),
                }
            }
        }

        Self::new()
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigNotFound(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        toml::from_str::<AppState>(&text).map_err(|e| Error::Config(e.to_string()))
    }

    /// `SUPABASE_URL` and `SUPABASE_ANON_KEY` win over file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SUPABASE_URL").filter(|v| !v.trim().is_empty()) {
            self.supabase_url = url.trim().to_string();
        }
        if let Some(key) = lookup("SUPABASE_ANON_KEY").filter(|v| !v.trim().is_empty()) {
            self.anon_key = key.trim().to_string();
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.trim().is_empty() && !self.anon_key.trim().is_empty()
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| Error::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppState::load_from(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigNotFound(_)));
    }

    #[test]
    fn defaults_fill_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatapp.toml");
        fs::write(&path, "supabase_url = \"https://abc.supabase.co\"\n").unwrap();

        let state = AppState::load_from(&path).unwrap();
        assert_eq!(state.supabase_url, "https://abc.supabase.co");
        assert_eq!(state.avatar_bucket, "avatars");
        assert_eq!(state.oauth_provider, "google");
        assert_eq!(state.callback_port, DEFAULT_CALLBACK_PORT);
        assert!(state.session.is_none());
        assert!(!state.is_configured());
    }

    #[test]
    fn save_then_load_keeps_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("chatapp.toml");
        let mut state = AppState::new();
        state.supabase_url = "https://abc.supabase.co".into();
        state.anon_key = "anon".into();
        state.session = Some(Session {
            access_token: "at".into(),
            refresh_token: "rt".into(),
            expires_at: 1_700_000_000,
        });
        state.save_to(&path).unwrap();

        let loaded = AppState::load_from(&path).unwrap();
        assert!(loaded.is_configured());
        assert_eq!(loaded.session.unwrap().refresh_token, "rt");
    }

    #[test]
    fn malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatapp.toml");
        fs::write(&path, "supabase_url = [").unwrap();
        assert!(matches!(AppState::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut state = AppState::new();
        state.supabase_url = "https://file.supabase.co".into();
        state.apply_env(|key| match key {
            "SUPABASE_URL" => Some(" https://env.supabase.co ".into()),
            "SUPABASE_ANON_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(state.supabase_url, "https://env.supabase.co");
        assert!(state.anon_key.is_empty());
    }

    #[test]
    fn legacy_json_is_migrated_to_toml() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("config").join("chatapp.toml");
        let legacy = dir.path().join("state.json");
        fs::write(
            &legacy,
            r#"{"supabase_url": "https://old.supabase.co", "anon_key": "anon",
               "session": {"access_token": "at", "refresh_token": "rt", "expires_at": 5}}"#,
        )
        .unwrap();

        let state = AppState::load_or_migrate(&toml_path, Some(&legacy));
        assert_eq!(state.supabase_url, "https://old.supabase.co");
        assert_eq!(state.avatar_bucket, "avatars");
        assert_eq!(state.session.as_ref().unwrap().refresh_token, "rt");

        let written = AppState::load_from(&toml_path).unwrap();
        assert_eq!(written.anon_key, "anon");
        assert_eq!(written.session, state.session);

        fs::write(&legacy, r#"{"supabase_url": "https://changed.supabase.co"}"#).unwrap();
        let again = AppState::load_or_migrate(&toml_path, Some(&legacy));
        assert_eq!(again.supabase_url, "https://old.supabase.co");
    }

    #[test]
    fn unreadable_legacy_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("chatapp.toml");
        let legacy = dir.path().join("state.json");
        fs::write(&legacy, "not json").unwrap();

        let state = AppState::load_or_migrate(&toml_path, Some(&legacy));
        assert!(!state.is_configured());
        assert!(!toml_path.exists());
        assert!(!AppState::load_or_migrate(&toml_path, None).is_configured());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut state = AppState::new();
        state.anon_key = "super-secret".into();
        let out = format!("{state:?}");
        assert!(!out.contains("super-secret"));
    }
}
