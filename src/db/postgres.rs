use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

use crate::curriculum::types::{
    truncate_description, ChangeType, Difficulty, HistoryEntry, Module, ModuleId, ModuleType, PathSnapshot,
};
use crate::db::config::{DbConfig, DbMode};
use crate::db::{
    history_id, parse_change_type, ChangedFields, CurriculumStore, DbInitError, NextSnapshot, PathRow,
    StoreError,
};

const PATH_COLUMNS: &str =
    r#""id", "studentId", "title", "difficulty", "currentModuleId", "progress", "updatedAt""#;
const HISTORY_COLUMNS: &str =
    r#""id", "learningPathId", "changeType", "previousState", "newState", "reason", "timestamp""#;

#[derive(Clone)]
pub struct PgCurriculumStore {
    pool: PgPool,
}

impl PgCurriculumStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DbConfig) -> Result<Self, DbInitError> {
        let url = config.require_database_url()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CurriculumStore for PgCurriculumStore {
    fn mode(&self) -> DbMode {
        DbMode::ServerPostgres
    }

    async fn load_modules(&self, learning_path_id: &str) -> Result<Vec<Module>, StoreError> {
        let rows = sqlx::query(
            r#"SELECT "id", "title", "content", "difficulty", "moduleType", "estimatedMinutes",
                      "orderIndex", "prerequisites", "isOptional"
               FROM "content_modules" WHERE "learningPathId" = $1
               ORDER BY "orderIndex" ASC, "id" ASC"#,
        )
        .bind(learning_path_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_module).collect()
    }

    async fn read_path_row(&self, learning_path_id: &str) -> Result<Option<PathRow>, StoreError> {
        let sql = format!(r#"SELECT {PATH_COLUMNS} FROM "learning_paths" WHERE "id" = $1"#);
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
               WHERE q."studentId" = $1 AND m."learningPathId" = $2 AND q."score" >= $3"#,
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

        let sql = format!(r#"SELECT {PATH_COLUMNS} FROM "learning_paths" WHERE "id" = $1 FOR UPDATE"#);
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

        let mut qb = QueryBuilder::<Postgres>::new(r#"UPDATE "learning_paths" SET "updatedAt" = "#);
        qb.push_bind(now);
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
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(&entry.id)
        .bind(&entry.learning_path_id)
        .bind(entry.change_type.as_str())
        .bind(Json(entry.previous_state.clone()))
        .bind(Json(entry.new_state.clone()))
        .bind(&entry.reason)
        .bind(entry.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(learning_path_id, history_id = %entry.id, change_type = change_type.as_str(), "committed path transition");
        Ok(Some(entry))
    }

    async fn history(&self, learning_path_id: &str, limit: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        let sql = format!(
            r#"SELECT {HISTORY_COLUMNS} FROM "path_history" WHERE "learningPathId" = $1
               ORDER BY "timestamp" DESC, "seq" DESC LIMIT $2"#
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
        let sql = format!(
            r#"SELECT {HISTORY_COLUMNS} FROM "path_history" WHERE "id" = $1 AND "learningPathId" = $2"#
        );
        let row = sqlx::query(&sql)
            .bind(history_id)
            .bind(learning_path_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_history).transpose()
    }
}

fn parse_module(row: &PgRow) -> Result<Module, StoreError> {
    let id: String = row.try_get("id")?;
    Ok(Module {
        title: row.try_get("title").unwrap_or_default(),
        description: truncate_description(&row.try_get::<String, _>("content").unwrap_or_default()),
        difficulty: Difficulty::parse(&row.try_get::<String, _>("difficulty").unwrap_or_default()),
        module_type: ModuleType::parse(&row.try_get::<String, _>("moduleType").unwrap_or_default()),
        estimated_minutes: row.try_get::<i32, _>("estimatedMinutes").unwrap_or(15).max(1) as u32,
        order_index: row.try_get("orderIndex").unwrap_or(0),
        prerequisites: row.try_get::<Vec<String>, _>("prerequisites").unwrap_or_default(),
        is_optional: row.try_get("isOptional").unwrap_or(false),
        id,
    })
}

fn parse_path_row(row: &PgRow) -> Result<PathRow, StoreError> {
    Ok(PathRow {
        id: row.try_get("id")?,
        student_id: row.try_get("studentId")?,
        title: row.try_get("title").unwrap_or(None),
        difficulty: Difficulty::parse(&row.try_get::<String, _>("difficulty").unwrap_or_default()),
        current_module_id: row.try_get("currentModuleId").unwrap_or(None),
        progress: row.try_get("progress").unwrap_or(0.0),
        updated_at: row.try_get::<Option<DateTime<Utc>>, _>("updatedAt").unwrap_or(None),
    })
}

fn parse_history(row: &PgRow) -> Result<HistoryEntry, StoreError> {
    let id: String = row.try_get("id")?;
    let change_type = parse_change_type(&row.try_get::<String, _>("changeType")?, &id)?;
    let previous_state: Json<PathSnapshot> = row.try_get("previousState")?;
    let new_state: Json<PathSnapshot> = row.try_get("newState")?;
    Ok(HistoryEntry {
        learning_path_id: row.try_get("learningPathId")?,
        change_type,
        previous_state: previous_state.0,
        new_state: new_state.0,
        reason: row.try_get("reason").unwrap_or_default(),
        timestamp: row.try_get("timestamp")?,
        id,
    })
}
