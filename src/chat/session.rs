use crate::api::auth::AuthUser;
use crate::api::models::Profile;

/// Which screen the signed-in state calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    SignedOut,
    NeedsUsername,
    Ready,
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self { user: None, profile: None, loading: true }
    }
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        if self.loading {
            return Phase::Loading;
        }
        match (&self.user, &self.profile) {
            (None, _) => Phase::SignedOut,
            (Some(_), Some(profile)) if profile.has_username() => Phase::Ready,
            (Some(_), _) => Phase::NeedsUsername,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn clear(&mut self) {
        self.user = None;
        self.profile = None;
        self.loading = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> AuthUser {
        AuthUser { id: "u1".into(), email: None, user_metadata: Default::default() }
    }

    #[test]
    fn phase_follows_state() {
        let mut state = SessionState::default();
        assert_eq!(state.phase(), Phase::Loading);

        state.loading = false;
        assert_eq!(state.phase(), Phase::SignedOut);

        state.user = Some(user());
        assert_eq!(state.phase(), Phase::NeedsUsername);

        state.profile = Some(Profile { id: "u1".into(), ..Profile::default() });
        assert_eq!(state.phase(), Phase::NeedsUsername);

        state.profile = Some(Profile { id: "u1".into(), username: Some("alice".into()), ..Profile::default() });
        assert_eq!(state.phase(), Phase::Ready);
        assert_eq!(state.user_id(), Some("u1"));

        state.clear();
        assert_eq!(state.phase(), Phase::SignedOut);
    }
}
