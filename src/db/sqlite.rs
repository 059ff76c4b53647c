use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::curriculum::types::{
    truncate_description, ChangeType, Difficulty, HistoryEntry, Module, ModuleId, ModuleType, PathSnapshot,
};
use crate::db::config::{DbMode, SqliteConfig};
use crate::db::sqlite_schema::{split_sql_statements, SQLITE_SCHEMA_SQL, SQLITE_SCHEMA_VERSION};
use crate::db::{
    history_id, parse_change_type, ChangedFields, CurriculumStore, NextSnapshot, PathRow, StoreError,
};

const PATH_COLUMNS: &str =
    r#""id", "studentId", "title", "difficulty", "currentModuleId", "progress", "updatedAt""#;
const HISTORY_COLUMNS: &str =
    r#""id", "learningPathId", "changeType", "previousState", "newState", "reason", "timestamp""#;

#[derive(Debug, thiserror::Error)]
pub enum SqliteInitError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Desktop-mode store backed by a local SQLite file.
#[derive(Clone)]
pub struct SqliteCurriculumStore {
    pool: SqlitePool,
}

impl SqliteCurriculumStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(config: &SqliteConfig) -> Result<Self, SqliteInitError> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SqliteInitError::Io(e.to_string()))?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", config.path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| SqliteInitError::Config(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        run_sqlite_migrations(&pool).await?;
        info!(path = %config.path.display(), "opened sqlite curriculum store");

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_learning_path(
        &self,
        learning_path_id: &str,
        student_id: &str,
        title: &str,
        difficulty: Difficulty,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO "learning_paths" ("id", "studentId", "title", "difficulty", "updatedAt")
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(learning_path_id)
        .bind(student_id)
        .bind(title)
        .bind(difficulty.as_str())
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_module(&self, learning_path_id: &str, module: &Module) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO "content_modules"
               ("id", "learningPathId", "title", "content", "difficulty", "moduleType",
                "estimatedMinutes", "orderIndex", "prerequisites", "isOptional")
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&module.id)
        .bind(learning_path_id)
        .bind(&module.title)
        .bind(&module.description)
        .bind(module.difficulty.as_str())
        .bind(module.module_type.as_str())
        .bind(i64::from(module.estimated_minutes))
        .bind(module.order_index)
        .bind(serde_json::to_string(&module.prerequisites)?)
        .bind(module.is_optional)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_quiz_result(&self, student_id: &str, module_id: &str, score: f64) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO "quiz_results" ("id", "studentId", "moduleId", "score") VALUES (?, ?, ?, ?)"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(student_id)
        .bind(module_id)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn run_sqlite_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    let version: Option<String> =
        sqlx::query_scalar(r#"SELECT "value" FROM "_db_metadata" WHERE "key" = 'schema_version'"#)
            .fetch_optional(pool)
            .await
            .unwrap_or(None);

    if version.is_some() {
        return Ok(());
    }

    for stmt in split_sql_statements(SQLITE_SCHEMA_SQL) {
        sqlx::query(&stmt).execute(pool).await?;
    }

    sqlx::query(r#"INSERT OR REPLACE INTO "_db_metadata" ("key", "value") VALUES ('schema_version', ?)"#)
        .bind(SQLITE_SCHEMA_VERSION)
        .execute(pool)
        .await?;

    info!(version = SQLITE_SCHEMA_VERSION, "sqlite schema initialized");
    Ok(())
}

#[async_trait]
impl CurriculumStore for SqliteCurriculumStore {
    fn mode(&self) -> DbMode {
        DbMode::DesktopSqlite
    }

    async fn load_modules(&self, learning_path_id: &str) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "id", "title", "content", "difficulty", "moduleType", "estimatedMinutes",
                      "orderIndex", "prerequisites", "isOptional"
               FROM "content_modules" WHERE "learningPathId" = ?
               ORDER BY "orderIndex" ASC, "id" ASC"#,
        )
        .bind(learning_path_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_module).collect()
    }

    async fn read_path_row(&self, learning_path_id: &str) -> Result<Option<PathRow>, StoreError> {
        let sql = format!(r#"SELECT {PATH_COLUMNS} FROM "learning_paths" WHERE "id" = ?"#);
        let row = sqlx::query(&sql)
            .bind(learning_path_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_path_row).transpose()
    }

    async fn read_completed_modules(
        &self,
        student_id: &str,
        learning_path_id: &str,
        passing_score: f64,
    ) -> Result<BTreeSet<ModuleId>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"SELECT DISTINCT q."moduleId"
               FROM "quiz_results" q
               JOIN "content_modules" m ON m."id" = q."moduleId"
               WHERE q."studentId" = ? AND m."learningPathId" = ? AND q."score" >= ?"#,
        )
        .bind(student_id)
        .bind(learning_path_id)
        .bind(passing_score)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    async fn commit_transition(
        &self,
        learning_path_id: &str,
        change_type: ChangeType,
        reason: &str,
        next: NextSnapshot<'_>,
    ) -> Result<Option<HistoryEntry>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Write first so the transaction holds the write lock before its read snapshot.
        let locked = sqlx::query(r#"UPDATE "learning_paths" SET "id" = "id" WHERE "id" = ?"#)
            .bind(learning_path_id)
            .execute(&mut *tx)
            .await?;
        if locked.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }

        let sql = format!(r#"SELECT {PATH_COLUMNS} FROM "learning_paths" WHERE "id" = ?"#);
        let row = sqlx::query(&sql)
            .bind(learning_path_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let previous_state = parse_path_row(&row)?.snapshot();
        let new_state = next(&previous_state);
        let changed = ChangedFields::between(&previous_state, &new_state);
        let now = Utc::now();

        let mut qb = QueryBuilder::<Sqlite>::new(r#"UPDATE "learning_paths" SET "updatedAt" = "#);
        qb.push_bind(format_timestamp(now));
        if changed.difficulty {
            qb.push(r#", "difficulty" = "#).push_bind(new_state.difficulty.as_str());
        }
        if changed.current_module_id {
            qb.push(r#", "currentModuleId" = "#)
                .push_bind(new_state.current_module_id.clone());
        }
        if changed.progress {
            qb.push(r#", "progress" = "#).push_bind(new_state.progress);
        }
        qb.push(r#" WHERE "id" = "#).push_bind(learning_path_id);
        qb.build().execute(&mut *tx).await?;

        let entry = HistoryEntry {
            id: history_id(),
            learning_path_id: learning_path_id.to_string(),
            change_type,
            previous_state,
            new_state,
            reason: reason.to_string(),
            timestamp: now,
        };

        sqlx::query(
            r#"INSERT INTO "path_history"
               ("id", "learningPathId", "changeType", "previousState", "newState", "reason", "timestamp")
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&entry.id)
        .bind(&entry.learning_path_id)
        .bind(entry.change_type.as_str())
        .bind(serde_json::to_string(&entry.previous_state)?)
        .bind(serde_json::to_string(&entry.new_state)?)
        .bind(&entry.reason)
        .bind(format_timestamp(entry.timestamp))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(learning_path_id, history_id = %entry.id, change_type = change_type.as_str(), "committed path transition");
        Ok(Some(entry))
    }

    async fn history(&self, learning_path_id: &str, limit: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        let sql = format!(
            r#"SELECT {HISTORY_COLUMNS} FROM "path_history" WHERE "learningPathId" = ?
               ORDER BY "timestamp" DESC, "seq" DESC LIMIT ?"#
        );
        let rows = sqlx::query(&sql)
            .bind(learning_path_id)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(parse_history).collect()
    }

    async fn history_entry(
        &self,
        learning_path_id: &str,
        history_id: &str,
    ) -> Result<Option<HistoryEntry>, StoreError> {
        let sql = format!(r#"SELECT {HISTORY_COLUMNS} FROM "path_history" WHERE "id" = ? AND "learningPathId" = ?"#);
        let row = sqlx::query(&sql)
            .bind(history_id)
            .bind(learning_path_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_history).transpose()
    }
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|d| d.with_timezone(&Utc))
}

fn parse_module(row: &SqliteRow) -> Result<Module, StoreError> {
    let id: String = row.try_get("id")?;
    let raw_prereqs: String = row.try_get("prerequisites").unwrap_or_else(|_| "[]".to_string());
    let prerequisites: Vec<ModuleId> =
        serde_json::from_str(&raw_prereqs).map_err(|e| StoreError::CorruptRow {
            table: "content_modules",
            id: id.clone(),
            detail: format!("prerequisites is not a JSON array: {e}"),
        })?;

    Ok(Module {
        title: row.try_get("title").unwrap_or_default(),
        description: truncate_description(&row.try_get::<String, _>("content").unwrap_or_default()),
        difficulty: Difficulty::parse(&row.try_get::<String, _>("difficulty").unwrap_or_default()),
        module_type: ModuleType::parse(&row.try_get::<String, _>("moduleType").unwrap_or_default()),
        estimated_minutes: row.try_get::<i64, _>("estimatedMinutes").unwrap_or(15).clamp(1, i64::from(u32::MAX)) as u32,
        order_index: row.try_get("orderIndex").unwrap_or(0),
        prerequisites,
        is_optional: row.try_get("isOptional").unwrap_or(false),
        id,
    })
}

fn parse_path_row(row: &SqliteRow) -> Result<PathRow, StoreError> {
    Ok(PathRow {
        id: row.try_get("id")?,
        student_id: row.try_get("studentId")?,
        title: row.try_get("title").unwrap_or(None),
        difficulty: Difficulty::parse(&row.try_get::<String, _>("difficulty").unwrap_or_default()),
        current_module_id: row.try_get("currentModuleId").unwrap_or(None),
        progress: row.try_get("progress").unwrap_or(0.0),
        updated_at: row
            .try_get::<Option<String>, _>("updatedAt")
            .unwrap_or(None)
            .as_deref()
            .and_then(parse_timestamp),
    })
}

fn parse_history(row: &SqliteRow) -> Result<HistoryEntry, StoreError> {
    let id: String = row.try_get("id")?;
    let change_type = parse_change_type(&row.try_get::<String, _>("changeType")?, &id)?;
    let previous_state: PathSnapshot = serde_json::from_str(&row.try_get::<String, _>("previousState")?)?;
    let new_state: PathSnapshot = serde_json::from_str(&row.try_get::<String, _>("newState")?)?;
    let raw_timestamp: String = row.try_get("timestamp")?;
    let timestamp = parse_timestamp(&raw_timestamp).ok_or_else(|| StoreError::CorruptRow {
        table: "path_history",
        id: id.clone(),
        detail: format!("unparseable timestamp {raw_timestamp:?}"),
    })?;

    Ok(HistoryEntry {
        learning_path_id: row.try_get("learningPathId")?,
        change_type,
        previous_state,
        new_state,
        reason: row.try_get("reason").unwrap_or_default(),
        timestamp,
        id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_are_fixed_width_and_roundtrip() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let formatted = format_timestamp(ts);
        assert_eq!(formatted, "2024-05-01T10:00:00.000000Z");
        assert_eq!(parse_timestamp(&formatted), Some(ts));
    }

    #[test]
    fn test_schema_default_timestamp_parses() {
        assert!(parse_timestamp("2024-05-01T10:00:00.123Z").is_some());
    }
}
