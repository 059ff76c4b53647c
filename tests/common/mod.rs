#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use curriculum_engine::cache::{CacheError, StateCache};
use curriculum_engine::curriculum::types::{Difficulty, Module, ModuleType};
use curriculum_engine::db::config::SqliteConfig;
use curriculum_engine::db::sqlite::SqliteCurriculumStore;
use curriculum_engine::db::CurriculumStore;

pub const STUDENT: &str = "student-1";
pub const PATH: &str = "path-1";

/// A migrated SQLite store in a temporary directory. The directory lives as
/// long as the fixture.
pub struct TestStore {
    _dir: TempDir,
    pub store: Arc<SqliteCurriculumStore>,
}

impl TestStore {
    pub fn dyn_store(&self) -> Arc<dyn CurriculumStore> {
        self.store.clone()
    }
}

pub async fn open_store() -> TestStore {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = SqliteConfig::at(dir.path().join("curriculum.db"));
    let store = SqliteCurriculumStore::open(&config)
        .await
        .expect("failed to open sqlite store");
    TestStore {
        _dir: dir,
        store: Arc::new(store),
    }
}

pub fn module(id: &str, difficulty: Difficulty, order_index: i32, prerequisites: &[&str]) -> Module {
    Module {
        id: id.to_string(),
        title: format!("Module {id}"),
        description: String::new(),
        difficulty,
        module_type: ModuleType::Lesson,
        estimated_minutes: 30,
        order_index,
        prerequisites: prerequisites.iter().map(|p| p.to_string()).collect(),
        is_optional: false,
    }
}

/// `{prefix}1` easy, `{prefix}2` medium after 1, `{prefix}3` hard after 2.
pub fn linear_modules(prefix: &str) -> Vec<Module> {
    let m1 = format!("{prefix}1");
    let m2 = format!("{prefix}2");
    let m3 = format!("{prefix}3");
    vec![
        module(&m1, Difficulty::Easy, 0, &[]),
        module(&m2, Difficulty::Medium, 1, &[m1.as_str()]),
        module(&m3, Difficulty::Hard, 2, &[m2.as_str()]),
    ]
}

pub async fn seed_path(
    store: &SqliteCurriculumStore,
    learning_path_id: &str,
    student_id: &str,
    difficulty: Difficulty,
    modules: &[Module],
) {
    store
        .insert_learning_path(learning_path_id, student_id, "Algebra basics", difficulty)
        .await
        .expect("failed to insert learning path");
    for module in modules {
        store
            .insert_module(learning_path_id, module)
            .await
            .expect("failed to insert module");
    }
}

/// `path-1` for `student-1`: hard path over M1 -> M2 -> M3.
pub async fn seed_default_path(store: &SqliteCurriculumStore) {
    seed_path(store, PATH, STUDENT, Difficulty::Hard, &linear_modules("M")).await;
}

/// Cache double whose every call fails.
#[derive(Debug, Default)]
pub struct FailingCache;

#[async_trait]
impl StateCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _payload: &str, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}
