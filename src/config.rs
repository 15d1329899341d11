use std::{
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::{bail, Context};
use serde::Deserialize;

pub const DEFAULT_BCRYPT_COST: u32 = 10;
const DEFAULT_DOCS_PATH: &str = "docs/swagger.yaml";
const DEFAULT_MONGODB_DATABASE: &str = "accounts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    /// MongoDB `users` collection.
    Mongo,
    /// Volatile in-process collection; explicit opt-in only.
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mongo" | "mongodb" | "document" => Ok(Self::Mongo),
            "memory" => Ok(Self::Memory),
            other => bail!("unknown storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Bcrypt,
    Argon2,
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bcrypt" => Ok(Self::Bcrypt),
            "argon2" | "argon2id" => Ok(Self::Argon2),
            other => bail!("unknown password algorithm: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub algorithm: HashAlgorithm,
    pub bcrypt_cost: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub mongodb_url: Option<String>,
    pub mongodb_database: String,
    pub max_connections: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub password: PasswordConfig,
    pub docs_path: PathBuf,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests don't have to
    /// touch the process environment.
    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = get("DATABASE_URL").filter(|v| !v.trim().is_empty());
        let mongodb_url = get("MONGODB_URL").filter(|v| !v.trim().is_empty());
        let backend = match get("STORAGE_BACKEND") {
            Some(v) => v.parse::<StorageBackend>()?,
            None if database_url.is_some() => StorageBackend::Postgres,
            None if mongodb_url.is_some() => StorageBackend::Mongo,
            None => bail!(
                "no storage configured: set DATABASE_URL, MONGODB_URL or STORAGE_BACKEND=memory"
            ),
        };
        match backend {
            StorageBackend::Postgres if database_url.is_none() => {
                bail!("STORAGE_BACKEND=postgres requires DATABASE_URL")
            }
            StorageBackend::Mongo if mongodb_url.is_none() => {
                bail!("STORAGE_BACKEND=mongo requires MONGODB_URL")
            }
            _ => {}
        }

        let storage = StorageConfig {
            backend,
            database_url,
            mongodb_url,
            mongodb_database: get("MONGODB_DATABASE")
                .unwrap_or_else(|| DEFAULT_MONGODB_DATABASE.to_string()),
            max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            timeout: Duration::from_millis(parse_or(&get, "STORAGE_TIMEOUT_MS", 3000)?),
        };

        let bcrypt_cost = parse_or(&get, "BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            bail!("BCRYPT_COST must be between 4 and 31, got {bcrypt_cost}");
        }
        let password = PasswordConfig {
            algorithm: match get("PASSWORD_ALGORITHM") {
                Some(v) => v.parse()?,
                None => HashAlgorithm::Bcrypt,
            },
            bcrypt_cost,
            timeout: Duration::from_millis(parse_or(&get, "HASH_TIMEOUT_MS", 5000)?),
        };

        let home = match get("APP_HOME") {
            Some(dir) => PathBuf::from(dir),
            None => install_dir()?,
        };
        let docs_path = resolve_relative(
            &home,
            get("API_DOCS_PATH").as_deref().unwrap_or(DEFAULT_DOCS_PATH),
        );

        Ok(Self {
            storage,
            password,
            docs_path,
        })
    }
}

fn parse_or<F, T>(get: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn install_dir() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe().context("resolve executable path")?;
    Ok(exe
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

fn resolve_relative(home: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        home.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_to_bcrypt_10() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv/accountd"),
            ("STORAGE_BACKEND", "memory"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Memory);
        assert_eq!(cfg.password.algorithm, HashAlgorithm::Bcrypt);
        assert_eq!(cfg.password.bcrypt_cost, 10);
        assert_eq!(cfg.password.timeout, Duration::from_secs(5));
        assert_eq!(cfg.storage.timeout, Duration::from_secs(3));
        assert_eq!(cfg.docs_path, PathBuf::from("/srv/accountd/docs/swagger.yaml"));
    }

    #[test]
    fn database_url_selects_postgres() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("DATABASE_URL", "postgres://localhost/accounts"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
    }

    #[test]
    fn mongodb_url_selects_mongo() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("MONGODB_URL", "mongodb://localhost:27017"),
        ]))
        .unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Mongo);
        assert_eq!(cfg.storage.mongodb_database, "accounts");
        assert_eq!("document".parse::<StorageBackend>().unwrap(), StorageBackend::Mongo);
    }

    #[test]
    fn volatile_storage_is_never_implied() {
        let err = AppConfig::from_lookup(lookup(&[("APP_HOME", "/srv")])).unwrap_err();
        assert!(err.to_string().contains("STORAGE_BACKEND=memory"));

        let err = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("STORAGE_BACKEND", "mongo"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MONGODB_URL"));
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("STORAGE_BACKEND", "postgres"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn absolute_docs_path_is_kept() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("STORAGE_BACKEND", "memory"),
            ("API_DOCS_PATH", "/etc/accountd/api.yaml"),
        ]))
        .unwrap();
        assert_eq!(cfg.docs_path, PathBuf::from("/etc/accountd/api.yaml"));
    }

    #[test]
    fn rejects_bad_numbers_and_out_of_range_cost() {
        let err = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("STORAGE_BACKEND", "memory"),
            ("HASH_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("HASH_TIMEOUT_MS"));

        let err = AppConfig::from_lookup(lookup(&[
            ("APP_HOME", "/srv"),
            ("STORAGE_BACKEND", "memory"),
            ("BCRYPT_COST", "3"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("BCRYPT_COST"));
    }

    #[test]
    fn parses_algorithm_names() {
        assert_eq!("Argon2".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Argon2);
        assert_eq!("bcrypt".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Bcrypt);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
