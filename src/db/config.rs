use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

const APP_DIR: &str = "curriculum-engine";
const SQLITE_FILE: &str = "curriculum.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbMode {
    ServerPostgres,
    DesktopSqlite,
}

impl DbMode {
    pub fn detect() -> Self {
        if std::env::var("DATABASE_URL").is_ok() {
            DbMode::ServerPostgres
        } else {
            DbMode::DesktopSqlite
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbMode::ServerPostgres => "postgres",
            DbMode::DesktopSqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub sqlite: SqliteConfig,
}

impl DbConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            redis_url: std::env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            max_connections: env_u32("DB_MAX_CONNECTIONS", 10),
            acquire_timeout: Duration::from_millis(env_u64("DB_ACQUIRE_TIMEOUT_MS", 5000)),
            sqlite: SqliteConfig::from_env(),
        }
    }

    pub fn mode(&self) -> DbMode {
        if self.database_url.is_some() {
            DbMode::ServerPostgres
        } else {
            DbMode::DesktopSqlite
        }
    }

    pub fn require_database_url(&self) -> Result<&str, DbConfigError> {
        self.database_url
            .as_deref()
            .ok_or(DbConfigError::Missing { key: "DATABASE_URL" })
    }
}

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl SqliteConfig {
    fn from_env() -> Self {
        let path = std::env::var("SQLITE_PATH")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_sqlite_path);

        Self {
            path,
            busy_timeout: Duration::from_millis(env_u64("SQLITE_BUSY_TIMEOUT_MS", 30_000)),
            max_connections: env_u32("SQLITE_MAX_CONNECTIONS", 5),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: Duration::from_secs(30),
            max_connections: 5,
        }
    }
}

pub fn default_sqlite_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join(SQLITE_FILE)
}

#[derive(Debug, Error)]
pub enum DbConfigError {
    #[error("Missing required env var: {key}")]
    Missing { key: &'static str },
}

pub(crate) fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("1") => true,
        Some("false") | Some("0") => false,
        _ => default,
    }
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_follows_database_url() {
        let mut config = DbConfig {
            database_url: None,
            redis_url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            sqlite: SqliteConfig::at("/tmp/test.db"),
        };
        assert_eq!(config.mode(), DbMode::DesktopSqlite);
        assert!(matches!(
            config.require_database_url(),
            Err(DbConfigError::Missing { key: "DATABASE_URL" })
        ));

        config.database_url = Some("postgres://localhost/curriculum".to_string());
        assert_eq!(config.mode(), DbMode::ServerPostgres);
        assert_eq!(config.require_database_url().ok(), Some("postgres://localhost/curriculum"));
    }

    #[test]
    fn test_default_sqlite_path_ends_with_app_file() {
        let path = default_sqlite_path();
        assert!(path.ends_with("curriculum-engine/curriculum.db"));
    }
}
