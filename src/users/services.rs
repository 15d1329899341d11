use std::{
    future::Future,
    sync::{Arc, OnceLock},
    time::Duration,
};

use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::{
    dto::{RegisterRequest, UpdateUserRequest},
    hooks::PrePersist,
    repo::UserStore,
    repo_types::{User, UserDraft},
    validation,
};
use crate::error::AppError;

/// Read-modify-write rounds before a contended update gives up.
const UPDATE_ATTEMPTS: u32 = 3;

/// Hashed once per service and verified against on login misses.
const DECOY_PASSWORD: &str = "decoy-password-for-unknown-accounts";

#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    hook: PrePersist,
    storage_timeout: Duration,
    decoy: Arc<OnceLock<String>>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>, hook: PrePersist, storage_timeout: Duration) -> Self {
        Self {
            store,
            hook,
            storage_timeout,
            decoy: Arc::new(OnceLock::new()),
        }
    }

    /// Bounds a storage call; running out of time is retryable.
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.storage_timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                warn!(op, timeout_ms = self.storage_timeout.as_millis() as u64, "storage timed out");
                Err(AppError::StorageTimeout)
            }
        }
    }

    #[instrument(skip(self, req), fields(email = %req.email))]
    pub async fn register(&self, req: RegisterRequest) -> Result<User, AppError> {
        let email = validation::normalize_email(&req.email);
        validation::validate_email(&email)?;

        let mut draft = UserDraft::new(email);
        draft.google_id = validation::normalize_identity("google", req.google_id)?;
        draft.facebook_id = validation::normalize_identity("facebook", req.facebook_id)?;
        if let Some(password) = req.password {
            validation::validate_password(&password)?;
            draft.set_password(password);
        }
        validation::check_credential_policy(&draft)?;

        let existing = self
            .bounded("find user by email", self.store.find_by_email(&draft.email))
            .await?;
        validation::ensure_email_available(existing.as_ref(), None)?;

        let hashed = self.hook.run(draft).await?;
        let user = self
            .bounded("create user", self.store.create(&hashed))
            .await?;
        info!(user_id = %user.id, email = %user.email, "user registered");
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<User, AppError> {
        self.bounded("find user by id", self.store.find_by_id(id))
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<User, AppError> {
        let email = validation::normalize_email(email);
        validation::validate_email(&email)?;
        self.bounded("find user by email", self.store.find_by_email(&email))
            .await?
            .ok_or_else(|| AppError::not_found("User not found"))
    }

    /// Applies a partial update. Only a supplied password is re-hashed; every
    /// other save carries the stored digest through. The write is guarded by
    /// the version that was loaded, and a lost race reloads and reapplies.
    #[instrument(skip(self, req))]
    pub async fn update(&self, id: Uuid, req: UpdateUserRequest) -> Result<User, AppError> {
        let mut attempt = 1;
        loop {
            let current = self.find_by_id(id).await?;
            let draft = self.apply_update(current, &req).await?;

            let password_changed = draft.is_password_modified();
            let hashed = self.hook.run(draft).await?;
            match self.bounded("update user", self.store.update(&hashed)).await {
                Ok(user) => {
                    info!(user_id = %user.id, password_changed, attempt, "user updated");
                    return Ok(user);
                }
                Err(AppError::StaleWrite) if attempt < UPDATE_ATTEMPTS => {
                    warn!(user_id = %id, attempt, "user changed during update; reloading");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn apply_update(
        &self,
        current: User,
        req: &UpdateUserRequest,
    ) -> Result<UserDraft, AppError> {
        let id = current.id;
        let mut draft = UserDraft::from_user(current);

        if let Some(email) = &req.email {
            let email = validation::normalize_email(email);
            validation::validate_email(&email)?;
            if email != draft.email {
                let existing = self
                    .bounded("find user by email", self.store.find_by_email(&email))
                    .await?;
                validation::ensure_email_available(existing.as_ref(), Some(id))?;
                draft.email = email;
            }
        }
        if let Some(google_id) = &req.google_id {
            draft.google_id = validation::normalize_identity("google", google_id.clone())?;
        }
        if let Some(facebook_id) = &req.facebook_id {
            draft.facebook_id = validation::normalize_identity("facebook", facebook_id.clone())?;
        }
        if let Some(password) = &req.password {
            validation::validate_password(password)?;
            draft.set_password(password.clone());
        }
        validation::check_credential_policy(&draft)?;
        Ok(draft)
    }

    /// Checks an email/password pair. Unknown emails, password-less accounts
    /// and wrong passwords all fail the same way and all pay for one verify.
    #[instrument(skip(self, password))]
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<User, AppError> {
        let email = validation::normalize_email(email);
        validation::validate_email(&email)?;

        let user = self
            .bounded("find user by email", self.store.find_by_email(&email))
            .await?;
        let digest = user.as_ref().and_then(|u| u.password.clone());
        let has_password = digest.is_some();
        let matched = self.check_password(password, digest).await?;

        match user {
            Some(user) if matched => Ok(user),
            Some(user) => {
                warn!(user_id = %user.id, has_password, "login rejected");
                Err(AppError::InvalidCredentials)
            }
            None => {
                warn!(email = %email, "login unknown email");
                Err(AppError::InvalidCredentials)
            }
        }
    }

    /// Verifies on the blocking pool within the hash budget. Without a stored
    /// digest the check runs against the decoy and never matches.
    async fn check_password(&self, plain: &str, digest: Option<String>) -> Result<bool, AppError> {
        let hasher = Arc::clone(self.hook.hasher());
        let decoy = Arc::clone(&self.decoy);
        let plain = plain.to_string();
        let job = tokio::task::spawn_blocking(move || match digest {
            Some(digest) => hasher.verify(&plain, &digest),
            None => {
                let decoy = decoy.get_or_init(|| hasher.hash(DECOY_PASSWORD).unwrap_or_default());
                let _ = hasher.verify(&plain, decoy);
                false
            }
        });

        let timeout = self.hook.timeout();
        match tokio::time::timeout(timeout, job).await {
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "password verify timed out");
                Err(AppError::HashTimeout)
            }
            Ok(Err(join)) => Err(AppError::Hash(join.to_string())),
            Ok(Ok(matched)) => Ok(matched),
        }
    }
}
