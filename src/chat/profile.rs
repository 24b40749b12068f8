use crate::api::models::{Profile, ProfileUpdate};

/// Editable copy of the signed-in user's profile.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ProfileDraft {
    pub full_name: String,
    pub avatar_url: String,
    pub editing: bool,
}

impl ProfileDraft {
    pub fn from_profile(profile: &Profile) -> Self {
        Self {
            full_name: profile.full_name.clone().unwrap_or_default(),
            avatar_url: profile.avatar_url.clone().unwrap_or_default(),
            editing: false,
        }
    }

    pub fn cancel(&mut self, profile: &Profile) {
        *self = Self::from_profile(profile);
    }

    pub fn to_update(&self) -> ProfileUpdate {
        let full_name = self.full_name.trim();
        ProfileUpdate {
            full_name: Some((!full_name.is_empty()).then(|| full_name.to_string())),
            avatar_url: Some((!self.avatar_url.is_empty()).then(|| self.avatar_url.clone())),
            ..ProfileUpdate::default()
        }
    }
}

pub fn status_label(profile: &Profile) -> &'static str {
    if profile.is_online { "Online" } else { "Offline" }
}
