use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record as stored by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: Option<String>, // digest, never plaintext
    pub google_id: Option<String>,
    pub facebook_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// A plaintext secret waiting to be hashed. Never serialised or logged.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn new(plain: impl Into<String>) -> Self {
        Self(plain.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone)]
pub(crate) enum PasswordState {
    /// Whatever the backend holds; carried through saves untouched.
    Stored(Option<String>),
    Changed(Secret),
}

/// A user being created or edited. Only the pre-persist hook can turn it into
/// a [`HashedUser`], which is what storage accepts.
#[derive(Debug, Clone)]
pub struct UserDraft {
    pub id: Uuid,
    pub email: String,
    pub google_id: Option<String>,
    pub facebook_id: Option<String>,
    pub(crate) password: PasswordState,
    /// `updated_at` as loaded; `None` for a record that was never stored.
    loaded_at: Option<OffsetDateTime>,
}

impl UserDraft {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            google_id: None,
            facebook_id: None,
            password: PasswordState::Stored(None),
            loaded_at: None,
        }
    }

    pub fn from_user(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            google_id: user.google_id,
            facebook_id: user.facebook_id,
            password: PasswordState::Stored(user.password),
            loaded_at: Some(user.updated_at),
        }
    }

    pub fn set_password(&mut self, plain: impl Into<String>) {
        self.password = PasswordState::Changed(Secret::new(plain));
    }

    pub fn is_password_modified(&self) -> bool {
        matches!(self.password, PasswordState::Changed(_))
    }

    pub fn has_password(&self) -> bool {
        match &self.password {
            PasswordState::Stored(digest) => digest.is_some(),
            PasswordState::Changed(_) => true,
        }
    }
}

/// A user whose password field holds a digest (or nothing). Storage adapters
/// only accept this type; outside tests only [`super::hooks::PrePersist`]
/// builds one.
#[derive(Debug, Clone)]
pub struct HashedUser {
    id: Uuid,
    email: String,
    password: Option<String>,
    google_id: Option<String>,
    facebook_id: Option<String>,
    loaded_at: Option<OffsetDateTime>,
}

impl HashedUser {
    pub(super) fn from_draft(draft: UserDraft, password: Option<String>) -> Self {
        Self {
            id: draft.id,
            email: draft.email,
            password,
            google_id: draft.google_id,
            facebook_id: draft.facebook_id,
            loaded_at: draft.loaded_at,
        }
    }

    /// Version guard for `update`: the write only applies while the stored
    /// `updated_at` still equals this value.
    pub fn loaded_at(&self) -> Option<OffsetDateTime> {
        self.loaded_at
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn google_id(&self) -> Option<&str> {
        self.google_id.as_deref()
    }

    pub fn facebook_id(&self) -> Option<&str> {
        self.facebook_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            password: Some("$2b$04$abcdefghijklmnopqrstuuFakeDigestFakeDigestFakeDigest12".into()),
            google_id: Some("g-1".into()),
            facebook_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn loaded_draft_is_not_modified() {
        let user = stored_user();
        let draft = UserDraft::from_user(user.clone());
        assert!(!draft.is_password_modified());
        assert!(draft.has_password());
        assert_eq!(draft.id, user.id);
        assert_eq!(draft.loaded_at, Some(user.updated_at));
    }

    #[test]
    fn new_draft_has_no_version() {
        let hashed = HashedUser::from_draft(UserDraft::new("a@x.com"), None);
        assert_eq!(hashed.loaded_at(), None);
    }

    #[test]
    fn set_password_marks_modified() {
        let mut draft = UserDraft::new("a@x.com");
        assert!(!draft.has_password());
        draft.set_password("secret1");
        assert!(draft.is_password_modified());
        assert!(draft.has_password());
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("hunter22");
        let dbg = format!("{draft:?}");
        assert!(!dbg.contains("hunter22"));
        assert!(dbg.contains("***"));
    }

    #[test]
    fn serialised_user_hides_digest() {
        let json = serde_json::to_value(stored_user()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["email"], "a@x.com");
        assert_eq!(json["googleId"], "g-1");
    }
}
