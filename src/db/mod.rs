pub mod config;
pub mod migrate;
pub mod postgres;
pub mod sqlite;
pub mod sqlite_schema;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::curriculum::types::{ChangeType, Difficulty, HistoryEntry, Module, ModuleId, PathSnapshot};
use crate::db::config::{DbConfig, DbConfigError, DbMode};
use crate::db::migrate::MigrationError;
use crate::db::postgres::PgCurriculumStore;
use crate::db::sqlite::{SqliteCurriculumStore, SqliteInitError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("snapshot serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt {table} row {id}: {detail}")]
    CorruptRow {
        table: &'static str,
        id: String,
        detail: String,
    },
}

/// The mutable columns of a `learning_paths` row plus its owner.
#[derive(Debug, Clone, PartialEq)]
pub struct PathRow {
    pub id: String,
    pub student_id: String,
    pub title: Option<String>,
    pub difficulty: Difficulty,
    pub current_module_id: Option<ModuleId>,
    pub progress: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PathRow {
    pub fn snapshot(&self) -> PathSnapshot {
        PathSnapshot {
            difficulty: self.difficulty,
            current_module_id: self.current_module_id.clone(),
            progress: self.progress,
        }
    }
}

/// Computes the next snapshot from the one read inside the transaction.
pub type NextSnapshot<'a> = &'a (dyn Fn(&PathSnapshot) -> PathSnapshot + Send + Sync);

/// Relational source of truth for learning paths and their history.
#[async_trait]
pub trait CurriculumStore: Send + Sync {
    fn mode(&self) -> DbMode;

    async fn load_modules(&self, learning_path_id: &str) -> Result<Vec<Module>, StoreError>;

    async fn read_path_row(&self, learning_path_id: &str) -> Result<Option<PathRow>, StoreError>;

    /// Modules of this path the student has passed with at least `passing_score`.
    async fn read_completed_modules(
        &self,
        student_id: &str,
        learning_path_id: &str,
        passing_score: f64,
    ) -> Result<BTreeSet<ModuleId>, StoreError>;

    /// In one transaction: read the current row, derive the next snapshot,
    /// write the changed columns plus `updatedAt`, and append a history entry.
    /// Returns `None` without writing when the path does not exist.
    async fn commit_transition(
        &self,
        learning_path_id: &str,
        change_type: ChangeType,
        reason: &str,
        next: NextSnapshot<'_>,
    ) -> Result<Option<HistoryEntry>, StoreError>;

    /// Newest first.
    async fn history(&self, learning_path_id: &str, limit: i64) -> Result<Vec<HistoryEntry>, StoreError>;

    async fn history_entry(
        &self,
        learning_path_id: &str,
        history_id: &str,
    ) -> Result<Option<HistoryEntry>, StoreError>;
}

#[derive(Debug, Error)]
pub enum DbInitError {
    #[error(transparent)]
    Config(#[from] DbConfigError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
}

/// Connects the store for the configured mode and brings its schema up to date.
pub async fn connect(config: &DbConfig) -> Result<Arc<dyn CurriculumStore>, DbInitError> {
    match config.mode() {
        DbMode::ServerPostgres => {
            let store = PgCurriculumStore::connect(config).await?;
            migrate::run_migrations(store.pool()).await?;
            Ok(Arc::new(store))
        }
        DbMode::DesktopSqlite => {
            let store = SqliteCurriculumStore::open(&config.sqlite).await?;
            Ok(Arc::new(store))
        }
    }
}

pub(crate) fn history_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub(crate) fn parse_change_type(raw: &str, id: &str) -> Result<ChangeType, StoreError> {
    ChangeType::parse(raw).ok_or_else(|| StoreError::CorruptRow {
        table: "path_history",
        id: id.to_string(),
        detail: format!("unknown changeType {raw:?}"),
    })
}

/// Which path columns differ between two snapshots.
pub(crate) struct ChangedFields {
    pub difficulty: bool,
    pub current_module_id: bool,
    pub progress: bool,
}

impl ChangedFields {
    pub fn between(prev: &PathSnapshot, next: &PathSnapshot) -> Self {
        Self {
            difficulty: prev.difficulty != next.difficulty,
            current_module_id: prev.current_module_id != next.current_module_id,
            progress: prev.progress != next.progress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_fields_only_flags_differences() {
        let prev = PathSnapshot {
            difficulty: Difficulty::Hard,
            current_module_id: Some("m1".to_string()),
            progress: 40.0,
        };
        let next = PathSnapshot {
            difficulty: Difficulty::Medium,
            ..prev.clone()
        };
        let changed = ChangedFields::between(&prev, &next);
        assert!(changed.difficulty);
        assert!(!changed.current_module_id);
        assert!(!changed.progress);
    }

    #[test]
    fn test_parse_change_type_rejects_unknown() {
        assert_eq!(parse_change_type("rollback", "h1").ok(), Some(ChangeType::Rollback));
        assert!(matches!(
            parse_change_type("teleport", "h1"),
            Err(StoreError::CorruptRow { table: "path_history", .. })
        ));
    }
}
