use async_trait::async_trait;
use uuid::Uuid;

use super::repo_types::{HashedUser, User};
use crate::error::AppError;

/// Persistence capability for user records. Backends enforce email
/// uniqueness themselves and report violations as [`AppError::Conflict`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &HashedUser) -> Result<User, AppError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;

    /// Replaces the stored record with the same id; `NotFound` if missing,
    /// `StaleWrite` if it changed after [`HashedUser::loaded_at`].
    async fn update(&self, user: &HashedUser) -> Result<User, AppError>;
}
