//! Process configuration resolved from the environment.
//!
//! The entry point builds a [`Config`] once and passes the pieces down to the
//! storage and image store constructors.

use std::path::PathBuf;

use crate::errors::{Error, Result};

pub const DEFAULT_SQLITE_DIR: &str = "./data";
pub const DEFAULT_SQLITE_FILE: &str = "threads.db";
pub const DEFAULT_POOL_SIZE: u32 = 8;
pub const DEFAULT_BUCKET_ENDPOINT: &str = "https://storage.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database: DatabaseConfig,
    pub images: ImageBackendConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseConfig {
    Sqlite {
        path: PathBuf,
        pool_size: u32,
    },
    Postgres {
        host: String,
        user: String,
        password: String,
        database: String,
        pool_size: u32,
    },
}

impl DatabaseConfig {
    /// Connection string for diesel. Postgres credentials are not redacted.
    pub fn url(&self) -> String {
        match self {
            DatabaseConfig::Sqlite { path, .. } => path.to_string_lossy().to_string(),
            DatabaseConfig::Postgres {
                host,
                user,
                password,
                database,
                ..
            } => format!("postgres://{}:{}@{}/{}", user, password, host, database),
        }
    }

    pub fn pool_size(&self) -> u32 {
        match self {
            DatabaseConfig::Sqlite { pool_size, .. } | DatabaseConfig::Postgres { pool_size, .. } => {
                *pool_size
            }
        }
    }
}

/// Where newly stored images go. Existing references keep resolving against
/// the backend they were written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageBackendConfig {
    Inline,
    Bucket(BucketConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketConfig {
    pub name: String,
    pub location: BucketLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BucketLocation {
    Http {
        endpoint: String,
        token: Option<String>,
    },
    Directory(PathBuf),
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let pool_size = match get("DB_POOL_SIZE") {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| Error::InvalidConfigValue(format!("DB_POOL_SIZE={}", raw)))?,
            None => DEFAULT_POOL_SIZE,
        };

        let db_type = get("DB_TYPE").unwrap_or_else(|| "sqlite".to_string());
        let database = match db_type.to_ascii_lowercase().as_str() {
            "sqlite" => {
                let dir = get("THREADS_DB_PATH").unwrap_or_else(|| DEFAULT_SQLITE_DIR.to_string());
                let file = get("THREADS_DB_NAME").unwrap_or_else(|| DEFAULT_SQLITE_FILE.to_string());
                DatabaseConfig::Sqlite {
                    path: PathBuf::from(dir).join(file),
                    pool_size,
                }
            }
            "postgres" | "postgresql" => {
                let require = |key: &str| get(key).ok_or_else(|| Error::MissingConfigKey(key.to_string()));
                let database = get("THREADS_DB_NAME")
                    .or_else(|| get("DB_NAME"))
                    .ok_or_else(|| Error::MissingConfigKey("DB_NAME".to_string()))?;
                DatabaseConfig::Postgres {
                    host: require("DB_HOST")?,
                    user: require("DB_USER")?,
                    password: require("DB_PASS")?,
                    database,
                    pool_size,
                }
            }
            other => return Err(Error::InvalidConfigValue(format!("DB_TYPE={}", other))),
        };

        let images = match get("STORAGE_BUCKET") {
            None => ImageBackendConfig::Inline,
            Some(name) => {
                let location = match get("STORAGE_DIR") {
                    Some(dir) => BucketLocation::Directory(PathBuf::from(dir)),
                    None => BucketLocation::Http {
                        endpoint: get("STORAGE_ENDPOINT")
                            .unwrap_or_else(|| DEFAULT_BUCKET_ENDPOINT.to_string())
                            .trim_end_matches('/')
                            .to_string(),
                        token: get("STORAGE_TOKEN"),
                    },
                };
                ImageBackendConfig::Bucket(BucketConfig { name, location })
            }
        };

        Ok(Config { database, images })
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_sqlite_and_inline_images() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(
            config.database,
            DatabaseConfig::Sqlite {
                path: PathBuf::from("./data").join("threads.db"),
                pool_size: DEFAULT_POOL_SIZE,
            }
        );
        assert_eq!(config.images, ImageBackendConfig::Inline);
    }

    #[test]
    fn test_postgres_requires_credentials() {
        let err = Config::from_lookup(lookup(&[("DB_TYPE", "postgres"), ("DB_NAME", "threads")]))
            .unwrap_err();
        assert!(matches!(err, Error::MissingConfigKey(_)));

        let config = Config::from_lookup(lookup(&[
            ("DB_TYPE", "postgres"),
            ("DB_NAME", "threads"),
            ("DB_HOST", "db:5432"),
            ("DB_USER", "agent"),
            ("DB_PASS", "secret"),
        ]))
        .unwrap();
        assert_eq!(config.database.url(), "postgres://agent:secret@db:5432/threads");
    }

    #[test]
    fn test_bucket_selection() {
        let config = Config::from_lookup(lookup(&[
            ("STORAGE_BUCKET", "agent-images"),
            ("STORAGE_ENDPOINT", "https://objects.example.com/"),
            ("STORAGE_TOKEN", "tok"),
        ]))
        .unwrap();
        assert_eq!(
            config.images,
            ImageBackendConfig::Bucket(BucketConfig {
                name: "agent-images".to_string(),
                location: BucketLocation::Http {
                    endpoint: "https://objects.example.com".to_string(),
                    token: Some("tok".to_string()),
                },
            })
        );

        let config = Config::from_lookup(lookup(&[
            ("STORAGE_BUCKET", "local"),
            ("STORAGE_DIR", "/var/lib/threadmem/images"),
        ]))
        .unwrap();
        assert!(matches!(
            config.images,
            ImageBackendConfig::Bucket(BucketConfig {
                location: BucketLocation::Directory(_),
                ..
            })
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("DB_TYPE", "mysql")])),
            Err(Error::InvalidConfigValue(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("DB_POOL_SIZE", "zero")])),
            Err(Error::InvalidConfigValue(_))
        ));
    }
}
