use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo_types::{HashedUser, User};
use crate::error::AppError;

/// Shape of a user document in the `users` collection. Absent optional
/// fields are left out of the document entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UserDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl UserDocument {
    pub fn from_hashed(
        user: &HashedUser,
        created_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) -> Self {
        Self {
            id: user.id().to_string(),
            email: user.email().to_string(),
            password: user.password().map(str::to_string),
            google_id: user.google_id().map(str::to_string),
            facebook_id: user.facebook_id().map(str::to_string),
            created_at,
            updated_at,
        }
    }

    pub fn into_user(self) -> Result<User, AppError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| AppError::storage(format!("corrupt user document {}: {e}", self.id)))?;
        Ok(User {
            id,
            email: self.email,
            password: self.password,
            google_id: self.google_id,
            facebook_id: self.facebook_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Next `updatedAt` for a document. Strictly later than `previous` so the
/// version guard always sees a change.
pub(super) fn next_updated_at(previous: OffsetDateTime) -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    if now > previous {
        now
    } else {
        previous + time::Duration::microseconds(1)
    }
}
