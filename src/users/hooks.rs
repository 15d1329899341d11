use std::{sync::Arc, time::Duration};

use tracing::{debug, error, instrument, warn};

use super::repo_types::{HashedUser, PasswordState, UserDraft};
use crate::{
    auth::password::{is_digest, PasswordHasher},
    error::AppError,
};

/// Runs before every save. A changed password is hashed with a fresh salt on
/// the blocking pool and the digest is in place before the record is returned;
/// an untouched password is carried through as-is.
#[derive(Clone, Debug)]
pub struct PrePersist {
    hasher: Arc<dyn PasswordHasher>,
    timeout: Duration,
}

impl PrePersist {
    pub fn new(hasher: Arc<dyn PasswordHasher>, timeout: Duration) -> Self {
        Self { hasher, timeout }
    }

    pub fn hasher(&self) -> &Arc<dyn PasswordHasher> {
        &self.hasher
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[instrument(skip_all, fields(user_id = %draft.id))]
    pub async fn run(&self, mut draft: UserDraft) -> Result<HashedUser, AppError> {
        let state = std::mem::replace(&mut draft.password, PasswordState::Stored(None));
        let password = match state {
            PasswordState::Stored(digest) => {
                if digest.as_deref().is_some_and(|d| !is_digest(d)) {
                    warn!("stored password is not a recognised digest; leaving it untouched");
                }
                debug!("password unchanged; skipping hash");
                digest
            }
            PasswordState::Changed(secret) => {
                let hasher = Arc::clone(&self.hasher);
                let job = tokio::task::spawn_blocking(move || hasher.hash(secret.expose()));
                let digest = match tokio::time::timeout(self.timeout, job).await {
                    Err(_) => {
                        error!(timeout_ms = self.timeout.as_millis() as u64, "password hash timed out");
                        return Err(AppError::HashTimeout);
                    }
                    Ok(Err(join)) => {
                        error!(error = %join, "password hash task failed");
                        return Err(AppError::Hash(join.to_string()));
                    }
                    Ok(Ok(Err(e))) => return Err(AppError::Hash(e.to_string())),
                    Ok(Ok(Ok(digest))) => digest,
                };
                debug!("password hashed");
                Some(digest)
            }
        };
        Ok(HashedUser::from_draft(draft, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::{verify_password, BcryptHasher};

    #[derive(Debug)]
    struct FailingHasher;

    impl PasswordHasher for FailingHasher {
        fn hash(&self, _plain: &str) -> anyhow::Result<String> {
            anyhow::bail!("entropy unavailable")
        }
    }

    #[derive(Debug)]
    struct SlowHasher;

    impl PasswordHasher for SlowHasher {
        fn hash(&self, plain: &str) -> anyhow::Result<String> {
            std::thread::sleep(Duration::from_millis(300));
            Ok(format!("slow:{plain}"))
        }
    }

    fn hook() -> PrePersist {
        PrePersist::new(Arc::new(BcryptHasher::new(4)), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn changed_password_is_replaced_by_digest() {
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("secret1");
        let saved = hook().run(draft).await.unwrap();
        let digest = saved.password().expect("digest present");
        assert_ne!(digest, "secret1");
        assert!(is_digest(digest));
        assert!(verify_password("secret1", digest));
    }

    #[tokio::test]
    async fn unchanged_password_keeps_digest() {
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("secret1");
        let first = hook().run(draft).await.unwrap();
        let original = first.password().unwrap().to_string();

        let mut reloaded = UserDraft::new(first.email());
        reloaded.id = first.id();
        reloaded.password = PasswordState::Stored(Some(original.clone()));
        reloaded.google_id = Some("g-1".into());

        let second = hook().run(reloaded).await.unwrap();
        assert_eq!(second.password(), Some(original.as_str()));
        assert_eq!(second.google_id(), Some("g-1"));
    }

    #[tokio::test]
    async fn resetting_same_password_yields_new_digest() {
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("secret1");
        let first = hook().run(draft.clone()).await.unwrap();
        let second = hook().run(draft).await.unwrap();
        assert_ne!(first.password(), second.password());
    }

    #[tokio::test]
    async fn hash_failure_is_fatal() {
        let hook = PrePersist::new(Arc::new(FailingHasher), Duration::from_secs(1));
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("secret1");
        let err = hook.run(draft).await.unwrap_err();
        assert!(matches!(err, AppError::Hash(ref m) if m.contains("entropy")));
    }

    #[tokio::test]
    async fn hash_timeout_is_fatal() {
        let hook = PrePersist::new(Arc::new(SlowHasher), Duration::from_millis(20));
        let mut draft = UserDraft::new("a@x.com");
        draft.set_password("secret1");
        let err = hook.run(draft).await.unwrap_err();
        assert!(matches!(err, AppError::HashTimeout));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn passwordless_record_passes_through() {
        let mut draft = UserDraft::new("a@x.com");
        draft.facebook_id = Some("fb-1".into());
        let saved = hook().run(draft).await.unwrap();
        assert_eq!(saved.password(), None);
        assert_eq!(saved.facebook_id(), Some("fb-1"));
    }
}
