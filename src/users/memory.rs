use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    document::{next_updated_at, UserDocument},
    repo::UserStore,
    repo_types::{HashedUser, User},
};
use crate::error::AppError;

#[derive(Default)]
struct Collection {
    docs: HashMap<Uuid, serde_json::Value>,
    /// unique index: email -> _id
    by_email: HashMap<String, Uuid>,
}

impl Collection {
    fn load(&self, id: &Uuid) -> Result<Option<User>, AppError> {
        self.docs
            .get(id)
            .map(|raw| {
                serde_json::from_value::<UserDocument>(raw.clone())
                    .map_err(|e| AppError::storage(format!("corrupt user document {id}: {e}")))
                    .and_then(UserDocument::into_user)
            })
            .transpose()
    }
}

/// Volatile document collection kept in process memory. Same document shape
/// and unique email index as the MongoDB adapter; nothing survives a restart.
#[derive(Default)]
pub struct MemoryUserStore {
    inner: RwLock<Collection>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn raw_document(&self, id: Uuid) -> Option<serde_json::Value> {
        self.inner.read().await.docs.get(&id).cloned()
    }
}

fn to_value(doc: &UserDocument) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(doc).map_err(|e| AppError::storage(format!("encode user document: {e}")))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, user: &HashedUser) -> Result<User, AppError> {
        let mut col = self.inner.write().await;

        if col.by_email.contains_key(user.email()) {
            return Err(AppError::conflict("Email already registered"));
        }
        if col.docs.contains_key(&user.id()) {
            return Err(AppError::conflict(format!("User '{}' already exists", user.id())));
        }

        let now = OffsetDateTime::now_utc();
        let doc = UserDocument::from_hashed(user, now, now);
        let raw = to_value(&doc)?;

        col.by_email.insert(user.email().to_string(), user.id());
        col.docs.insert(user.id(), raw);
        debug!(user_id = %user.id(), "document inserted");
        doc.into_user()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let col = self.inner.read().await;
        match col.by_email.get(email) {
            Some(id) => col.load(id),
            None => Ok(None),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.inner.read().await.load(&id)
    }

    async fn update(&self, user: &HashedUser) -> Result<User, AppError> {
        let mut col = self.inner.write().await;

        let current = col
            .load(&user.id())?
            .ok_or_else(|| AppError::not_found(format!("User '{}' not found", user.id())))?;
        if user.loaded_at().is_some_and(|seen| seen != current.updated_at) {
            debug!(user_id = %user.id(), "stale document write rejected");
            return Err(AppError::StaleWrite);
        }

        if current.email != user.email() {
            if col.by_email.contains_key(user.email()) {
                return Err(AppError::conflict("Email already registered"));
            }
            col.by_email.remove(&current.email);
            col.by_email.insert(user.email().to_string(), user.id());
        }

        let doc = UserDocument::from_hashed(
            user,
            current.created_at,
            next_updated_at(current.updated_at),
        );
        let raw = to_value(&doc)?;
        col.docs.insert(user.id(), raw);
        debug!(user_id = %user.id(), "document updated");
        doc.into_user()
    }
}
