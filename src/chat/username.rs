use std::time::Duration;

use crate::api::auth::AuthUser;
use crate::api::models::ProfileUpsert;

pub const MIN_USERNAME_CHARS: usize = 3;
pub const CHECK_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsernameStatus {
    /// `None` while a check is in flight.
    pub valid: Option<bool>,
    pub message: &'static str,
}

/// Progress of one availability check, reported back from the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckUpdate {
    /// The request for this name is in flight.
    Started(String),
    /// `None` when the request failed.
    Finished(String, Option<bool>),
}

/// State of the "choose a username" form.
#[derive(Debug, Default, Clone)]
pub struct UsernameForm {
    input: String,
    checking: bool,
    available: Option<bool>,
    submitting: bool,
}

impl UsernameForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn candidate(&self) -> &str {
        self.input.trim()
    }

    fn long_enough(&self) -> bool {
        self.candidate().chars().count() >= MIN_USERNAME_CHARS
    }

    /// Record a keystroke. Returns true when an availability check should be
    /// scheduled for the new value.
    pub fn set_input(&mut self, value: &str) -> bool {
        self.input = value.to_string();
        self.available = None;
        self.checking = false;
        self.long_enough()
    }

    pub fn check_started(&mut self, checking: &str) {
        if checking == self.candidate() {
            self.checking = true;
        }
    }

    /// Apply a check result, unless the input moved on since it was issued.
    /// Returns whether it applied.
    pub fn check_finished(&mut self, checked: &str, available: Option<bool>) -> bool {
        if checked != self.candidate() {
            return false;
        }
        self.checking = false;
        self.available = available;
        true
    }

    /// Returns true when the check for the current input failed.
    pub fn apply_check(&mut self, update: CheckUpdate) -> bool {
        match update {
            CheckUpdate::Started(name) => {
                self.check_started(&name);
                false
            }
            CheckUpdate::Finished(name, available) => {
                self.check_finished(&name, available) && available.is_none()
            }
        }
    }

    pub fn status(&self) -> Option<UsernameStatus> {
        if self.input.is_empty() {
            return None;
        }
        if !self.long_enough() {
            return Some(UsernameStatus {
                valid: Some(false),
                message: "Username must be at least 3 characters",
            });
        }
        if self.checking {
            return Some(UsernameStatus { valid: None, message: "Checking availability..." });
        }
        match self.available {
            None => None,
            Some(true) => Some(UsernameStatus { valid: Some(true), message: "Username is available" }),
            Some(false) => Some(UsernameStatus { valid: Some(false), message: "Username is already taken" }),
        }
    }

    pub fn can_submit(&self) -> bool {
        self.available == Some(true) && !self.checking && !self.submitting && self.long_enough()
    }

    pub fn set_submitting(&mut self, submitting: bool) {
        self.submitting = submitting;
    }

    /// The profile row to create for `user`. An uploaded avatar wins over
    /// the one supplied by the identity provider.
    pub fn profile_for(&self, user: &AuthUser, uploaded_avatar: Option<&str>) -> ProfileUpsert {
        let avatar_url = uploaded_avatar
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| user.user_metadata.preferred_avatar());
        ProfileUpsert {
            id: user.id.clone(),
            google_id: user.user_metadata.provider_id.clone(),
            username: self.candidate().to_string(),
            full_name: user.user_metadata.preferred_full_name(),
            avatar_url,
            email: user.email.clone(),
            is_online: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::UserMetadata;

    #[test]
    fn status_progression() {
        let mut form = UsernameForm::new();
        assert_eq!(form.status(), None);

        assert!(!form.set_input("ab"));
        assert_eq!(form.status().unwrap().message, "Username must be at least 3 characters");

        assert!(form.set_input("abc"));
        assert_eq!(form.status(), None);
        form.check_started("abc");
        assert_eq!(form.status().unwrap().valid, None);

        form.check_finished("abc", Some(false));
        assert_eq!(form.status().unwrap().message, "Username is already taken");
        assert!(!form.can_submit());

        form.set_input("abcd");
        form.check_started("abcd");
        form.check_finished("abcd", Some(true));
        assert_eq!(form.status().unwrap().valid, Some(true));
        assert!(form.can_submit());
        form.set_submitting(true);
        assert!(!form.can_submit());
    }

    #[test]
    fn stale_results_are_dropped() {
        let mut form = UsernameForm::new();
        form.set_input("alice");
        form.check_started("alice");
        form.set_input("alicia");
        assert!(!form.check_finished("alice", Some(true)));
        assert!(!form.can_submit());
        assert_eq!(form.status(), None);
    }

    #[test]
    fn checking_shows_only_once_the_request_starts() {
        let mut form = UsernameForm::new();
        form.set_input("bob");
        form.set_input("bobby");
        assert_eq!(form.status(), None);
        assert!(!form.apply_check(CheckUpdate::Started("bob".into())));
        assert_eq!(form.status(), None);
        form.apply_check(CheckUpdate::Started("bobby".into()));
        assert_eq!(form.status().unwrap().message, "Checking availability...");
    }

    #[test]
    fn failed_check_is_reported_once_for_current_input() {
        let mut form = UsernameForm::new();
        form.set_input("carol");
        form.apply_check(CheckUpdate::Started("carol".into()));
        assert!(!form.apply_check(CheckUpdate::Finished("caro".into(), None)));
        assert!(form.apply_check(CheckUpdate::Finished("carol".into(), None)));
        assert_eq!(form.status(), None);
        assert!(!form.can_submit());
        assert!(!form.apply_check(CheckUpdate::Finished("carol".into(), Some(true))));
        assert!(form.can_submit());
    }

    #[test]
    fn profile_row_from_auth_user() {
        let user = AuthUser {
            id: "u1".into(),
            email: Some("a@example.com".into()),
            user_metadata: UserMetadata {
                name: Some("Alice".into()),
                avatar_url: Some("https://lh3/a.png".into()),
                provider_id: Some("g-42".into()),
                ..UserMetadata::default()
            },
        };
        let mut form = UsernameForm::new();
        form.set_input("  alice ");
        let row = form.profile_for(&user, None);
        assert_eq!(row.username, "alice");
        assert_eq!(row.full_name.as_deref(), Some("Alice"));
        assert_eq!(row.google_id.as_deref(), Some("g-42"));
        assert_eq!(row.avatar_url.as_deref(), Some("https://lh3/a.png"));
        assert!(row.is_online);

        let row = form.profile_for(&user, Some("https://x/avatars/avatar-u1-1.png"));
        assert_eq!(row.avatar_url.as_deref(), Some("https://x/avatars/avatar-u1-1.png"));
    }
}
