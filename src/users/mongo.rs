use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use mongodb::{
    bson::{doc, Document},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOneAndUpdateOptions, IndexOptions, ReturnDocument},
    Client, Collection, IndexModel,
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{
    document::{next_updated_at, UserDocument},
    repo::UserStore,
    repo_types::{HashedUser, User},
};
use crate::error::AppError;

const USERS: &str = "users";
const DUPLICATE_KEY: i32 = 11000;

/// Document-oriented adapter over a MongoDB `users` collection with a unique
/// index on `email`.
#[derive(Debug, Clone)]
pub struct MongoUserStore {
    users: Collection<UserDocument>,
}

impl MongoUserStore {
    fn new(users: Collection<UserDocument>) -> Self {
        Self { users }
    }

    /// Connects, then makes sure the unique email index exists.
    pub async fn connect(url: &str, database: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut options = ClientOptions::parse(url)
            .await
            .context("parse MONGODB_URL")?;
        options.app_name = Some("accountd".to_string());
        options.server_selection_timeout = Some(timeout);
        let client = Client::with_options(options).context("build mongodb client")?;

        let store = Self::new(client.database(database).collection(USERS));
        let index = IndexModel::builder()
            .keys(doc! { "email": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        store
            .users
            .create_index(index, None)
            .await
            .context("create unique index on users.email")?;
        info!(database, "mongodb users collection ready");
        Ok(store)
    }
}

/// E11000 becomes a conflict; failing to reach a server in time is a
/// retryable timeout.
fn classify(e: MongoError, op: &str) -> AppError {
    match e.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(w)) if w.code == DUPLICATE_KEY => {
            AppError::conflict("Email already registered")
        }
        ErrorKind::Command(c) if c.code == DUPLICATE_KEY => {
            AppError::conflict("Email already registered")
        }
        ErrorKind::ServerSelection { .. } => AppError::StorageTimeout,
        _ => {
            error!(error = %e, op, "mongodb operation failed");
            AppError::storage(format!("{op}: {e}"))
        }
    }
}

fn rfc3339(at: OffsetDateTime) -> Result<String, AppError> {
    at.format(&Rfc3339)
        .map_err(|e| AppError::storage(format!("format timestamp: {e}")))
}

/// Matches the record by id and, when the caller loaded it first, by the
/// `updatedAt` it saw.
fn guard_filter(user: &HashedUser) -> Result<Document, AppError> {
    let mut filter = doc! { "_id": user.id().to_string() };
    if let Some(seen) = user.loaded_at() {
        filter.insert("updatedAt", rfc3339(seen)?);
    }
    Ok(filter)
}

/// `$set` for present fields, `$unset` for absent ones, so the stored
/// document never carries nulls.
fn update_document(user: &HashedUser, updated_at: OffsetDateTime) -> Result<Document, AppError> {
    let mut set = doc! {
        "email": user.email(),
        "updatedAt": rfc3339(updated_at)?,
    };
    let mut unset = Document::new();
    for (key, value) in [
        ("password", user.password()),
        ("googleId", user.google_id()),
        ("facebookId", user.facebook_id()),
    ] {
        match value {
            Some(v) => {
                set.insert(key, v);
            }
            None => {
                unset.insert(key, "");
            }
        }
    }

    let mut update = doc! { "$set": set };
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    Ok(update)
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn create(&self, user: &HashedUser) -> Result<User, AppError> {
        let now = OffsetDateTime::now_utc();
        let doc = UserDocument::from_hashed(user, now, now);
        self.users
            .insert_one(&doc, None)
            .await
            .map_err(|e| classify(e, "create user"))?;
        debug!(user_id = %user.id(), "document inserted");
        doc.into_user()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.users
            .find_one(doc! { "email": email }, None)
            .await
            .map_err(|e| classify(e, "find user by email"))?
            .map(UserDocument::into_user)
            .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.users
            .find_one(doc! { "_id": id.to_string() }, None)
            .await
            .map_err(|e| classify(e, "find user by id"))?
            .map(UserDocument::into_user)
            .transpose()
    }

    async fn update(&self, user: &HashedUser) -> Result<User, AppError> {
        let updated_at = next_updated_at(user.loaded_at().unwrap_or_else(OffsetDateTime::now_utc));
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        let updated = self
            .users
            .find_one_and_update(guard_filter(user)?, update_document(user, updated_at)?, options)
            .await
            .map_err(|e| classify(e, "update user"))?;
        if let Some(doc) = updated {
            debug!(user_id = %user.id(), "document updated");
            return doc.into_user();
        }

        // nothing matched: either gone or moved on since it was loaded
        let exists = self
            .users
            .count_documents(doc! { "_id": user.id().to_string() }, None)
            .await
            .map_err(|e| classify(e, "update user"))?;
        if exists == 0 {
            Err(AppError::not_found(format!("User '{}' not found", user.id())))
        } else {
            debug!(user_id = %user.id(), "stale document write rejected");
            Err(AppError::StaleWrite)
        }
    }
}
