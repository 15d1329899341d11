//! Checks that run before anything reaches the hasher or a storage backend.
//! Pure functions; none of them touch a database.

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

use super::repo_types::{User, UserDraft};
use crate::error::AppError;

pub const MIN_PASSWORD_LEN: usize = 6;
/// bcrypt only looks at the first 72 bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn validate_email(email: &str) -> Result<(), AppError> {
    if !is_valid_email(email) {
        return Err(AppError::validation("Invalid email"));
    }
    Ok(())
}

pub fn validate_password(plain: &str) -> Result<(), AppError> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation("Password too short"));
    }
    if plain.len() > MAX_PASSWORD_BYTES {
        return Err(AppError::validation("Password too long"));
    }
    Ok(())
}

/// Trims an identity-provider id; blank ids are rejected rather than stored.
pub fn normalize_identity(provider: &str, id: Option<String>) -> Result<Option<String>, AppError> {
    match id {
        None => Ok(None),
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Err(AppError::validation(format!("{provider} id must not be blank")));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}

/// A record may carry a password and linked identities together, but it must
/// keep at least one way to sign in.
pub fn check_credential_policy(draft: &UserDraft) -> Result<(), AppError> {
    if !draft.has_password() && draft.google_id.is_none() && draft.facebook_id.is_none() {
        return Err(AppError::validation(
            "A password or a linked identity is required",
        ));
    }
    Ok(())
}

/// Uniqueness precondition for `email`. `owner` is the id of the record being
/// saved, so a user keeping their own address passes.
pub fn ensure_email_available(existing: Option<&User>, owner: Option<Uuid>) -> Result<(), AppError> {
    match existing {
        Some(found) if Some(found.id) != owner => {
            Err(AppError::conflict("Email already registered"))
        }
        _ => Ok(()),
    }
}
