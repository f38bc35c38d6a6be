use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Avatar shown when a profile has none of its own.
pub const DEFAULT_AVATAR_URL: &str = "https://images.pexels.com/photos/2379004/pexels-photo-2379004.jpeg?auto=compress&cs=tinysrgb&w=100&h=100&dpr=2";

/// Display name of last resort when neither profile nor e-mail yields one.
pub const DEFAULT_DISPLAY_NAME: &str = "User";

/// Stable, opaque identifier of an authenticated subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Credential issued by the identity store.
///
/// The token is opaque to this crate and is only carried along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub subject: SubjectId,
    pub email: String,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// False until the subject has confirmed their e-mail address.
    #[serde(default = "confirmed_default")]
    pub confirmed: bool,
}

fn confirmed_default() -> bool {
    true
}

impl Credential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Profile row kept by the data store.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    pub id: SubjectId,
    pub email: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial profile update. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.avatar_url.is_none() && self.bio.is_none()
    }

    /// Applies the update on top of an existing (or fresh) profile row.
    pub fn apply(&self, profile: &mut Profile) {
        if let Some(name) = &self.full_name {
            profile.full_name = Some(name.clone());
        }
        if let Some(avatar) = &self.avatar_url {
            profile.avatar_url = Some(avatar.clone());
        }
        if let Some(bio) = &self.bio {
            profile.bio = Some(bio.clone());
        }
    }
}

/// The resolved identity of the current user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub subject: SubjectId,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub bio: Option<String>,
    pub credential: Credential,
}

impl Session {
    /// Builds a session from a credential, enriched with a profile when one is available.
    ///
    /// Missing profile fields fall back to values derived from the credential alone.
    pub fn from_credential(credential: Credential, profile: Option<&Profile>) -> Self {
        let display_name = profile
            .and_then(|p| p.full_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| default_display_name(&credential.email));
        let avatar_url = profile
            .and_then(|p| p.avatar_url.as_deref())
            .filter(|url| !url.is_empty())
            .unwrap_or(DEFAULT_AVATAR_URL)
            .to_string();

        Self {
            subject: credential.subject.clone(),
            email: credential.email.clone(),
            display_name,
            avatar_url,
            bio: profile.and_then(|p| p.bio.clone()),
            credential,
        }
    }
}

fn default_display_name(email: &str) -> String {
    match email.split('@').next() {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => DEFAULT_DISPLAY_NAME.to_string(),
    }
}

/// What consumers observe of the Session Manager at a given instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    /// True until the initial credential lookup has resolved or timed out.
    pub resolving: bool,
    /// True while a sign-in, sign-up, sign-out or profile operation is running.
    pub busy: bool,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            session: None,
            resolving: true,
            busy: false,
        }
    }
}

impl SessionSnapshot {
    pub fn subject(&self) -> Option<&SubjectId> {
        self.session.as_ref().map(|s| &s.subject)
    }
}
