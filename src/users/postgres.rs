use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use super::{
    repo::UserStore,
    repo_types::{HashedUser, User},
};
use crate::error::AppError;

const USER_COLUMNS: &str = "id, email, password, google_id, facebook_id, created_at, updated_at";

/// Relational adapter over the `users` table.
#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps sqlx failures onto domain errors. Unique violations become conflicts;
/// a pool that cannot hand out a connection in time is a retryable timeout.
fn classify(e: sqlx::Error, op: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::conflict("Email already registered")
        }
        sqlx::Error::PoolTimedOut => AppError::StorageTimeout,
        _ => {
            error!(error = %e, op, "postgres query failed");
            AppError::storage(format!("{op}: {e}"))
        }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, user: &HashedUser) -> Result<User, AppError> {
        let sql = format!(
            r#"
            INSERT INTO users (id, email, password, google_id, facebook_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id())
            .bind(user.email())
            .bind(user.password())
            .bind(user.google_id())
            .bind(user.facebook_id())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "create user"))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "find user by email"))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "find user by id"))
    }

    async fn update(&self, user: &HashedUser) -> Result<User, AppError> {
        let sql = format!(
            r#"
            UPDATE users
               SET email = $2, password = $3, google_id = $4, facebook_id = $5,
                   updated_at = GREATEST(now(), updated_at + interval '1 microsecond')
             WHERE id = $1
               AND ($6::timestamptz IS NULL OR updated_at = $6)
            RETURNING {USER_COLUMNS}
            "#
        );
        let updated = sqlx::query_as::<_, User>(&sql)
            .bind(user.id())
            .bind(user.email())
            .bind(user.password())
            .bind(user.google_id())
            .bind(user.facebook_id())
            .bind(user.loaded_at())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| classify(e, "update user"))?;
        if let Some(row) = updated {
            return Ok(row);
        }

        // nothing matched: either gone or moved on since it was loaded
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user.id())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| classify(e, "update user"))?;
        if exists {
            Err(AppError::StaleWrite)
        } else {
            Err(AppError::not_found(format!("User '{}' not found", user.id())))
        }
    }
}
