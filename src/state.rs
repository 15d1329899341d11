use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    auth::password::hasher_from_config,
    config::{AppConfig, StorageBackend, StorageConfig},
    docs::ApiDocs,
    users::{
        hooks::PrePersist, memory::MemoryUserStore, mongo::MongoUserStore,
        postgres::PgUserStore, repo::UserStore, services::UserService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: UserService,
    pub docs: Option<Arc<ApiDocs>>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);
        let store = open_store(&config.storage).await?;
        let docs = ApiDocs::load(&config.docs_path);
        Ok(Self::from_parts(config, store, docs))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn UserStore>,
        docs: Option<Arc<ApiDocs>>,
    ) -> Self {
        let hook = PrePersist::new(hasher_from_config(&config.password), config.password.timeout);
        let users = UserService::new(store, hook, config.storage.timeout);
        Self {
            config,
            users,
            docs,
        }
    }
}

#[cfg(test)]
impl AppState {
    /// In-memory state with a cheap bcrypt cost.
    pub fn fake() -> Self {
        Self::fake_with_docs(None)
    }

    pub fn fake_with_docs(docs: Option<Arc<ApiDocs>>) -> Self {
        use crate::config::{HashAlgorithm, PasswordConfig};
        use std::{path::PathBuf, time::Duration};

        let config = Arc::new(AppConfig {
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                mongodb_url: None,
                mongodb_database: "accounts".into(),
                max_connections: 1,
                timeout: Duration::from_secs(5),
            },
            password: PasswordConfig {
                algorithm: HashAlgorithm::Bcrypt,
                bcrypt_cost: 4,
                timeout: Duration::from_secs(5),
            },
            docs_path: PathBuf::from("docs/swagger.yaml"),
        });
        let store = Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>;
        Self::from_parts(config, store, docs)
    }
}

async fn open_store(cfg: &StorageConfig) -> anyhow::Result<Arc<dyn UserStore>> {
    match cfg.backend {
        StorageBackend::Memory => {
            warn!("using in-memory store; users are lost on restart");
            Ok(Arc::new(MemoryUserStore::new()))
        }
        StorageBackend::Mongo => {
            let url = cfg
                .mongodb_url
                .as_deref()
                .context("MONGODB_URL is required for the mongo backend")?;
            let store = MongoUserStore::connect(url, &cfg.mongodb_database, cfg.timeout).await?;
            info!("using mongodb store");
            Ok(Arc::new(store))
        }
        StorageBackend::Postgres => {
            let url = cfg
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let db = sqlx::postgres::PgPoolOptions::new()
                .max_connections(cfg.max_connections)
                .acquire_timeout(cfg.timeout)
                .connect(url)
                .await
                .context("connect to database")?;

            // Run migrations if present
            if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                warn!(error = %e, "migrations folder not found or migration failed; continuing");
            }
            info!("using postgres store");
            Ok(Arc::new(PgUserStore::new(db)))
        }
    }
}
