use std::sync::Arc;

use curriculum_engine::cache::{RedisCache, StateCache};
use curriculum_engine::config::Config;
use curriculum_engine::curriculum::difficulty::infer_path_difficulty;
use curriculum_engine::curriculum::{DependencyAnalyzer, PathGraph};
use curriculum_engine::db::{self, config::DbConfig};
use curriculum_engine::logging;
use curriculum_engine::state::AppState;

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    let _log_guard = logging::init_tracing(&config.log_level);

    let db_config = DbConfig::from_env();
    tracing::info!(mode = db_config.mode().as_str(), "connecting curriculum store");

    let store = match db::connect(&db_config).await {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(error = %err, "curriculum store not initialized");
            std::process::exit(1);
        }
    };

    let cache: Option<Arc<dyn StateCache>> = match &db_config.redis_url {
        Some(url) if config.cache_enabled => match RedisCache::connect(url).await {
            Ok(cache) => Some(Arc::new(cache.with_jitter(config.cache_ttl_jitter))),
            Err(err) => {
                tracing::warn!(error = %err, "redis cache not initialized, continuing without cache");
                None
            }
        },
        _ => None,
    };

    let state = AppState::new(store, cache, config);

    let path_ids: Vec<String> = std::env::args().skip(1).collect();
    if path_ids.is_empty() {
        tracing::info!("no learning path ids given, nothing to audit");
        return;
    }

    let mut failures = 0usize;
    for learning_path_id in &path_ids {
        if !audit_path(&state, learning_path_id).await {
            failures += 1;
        }
    }

    tracing::info!(audited = path_ids.len(), failures, "curriculum audit complete");
    if failures > 0 {
        std::process::exit(2);
    }
}

async fn audit_path(state: &AppState, learning_path_id: &str) -> bool {
    let store = state.store();
    let graph = match PathGraph::load(store.as_ref(), learning_path_id).await {
        Ok(graph) => graph,
        Err(err) => {
            tracing::error!(learning_path_id, error = %err, "failed to load learning path");
            return false;
        }
    };

    if graph.is_empty() {
        tracing::warn!(learning_path_id, "learning path has no modules");
        return true;
    }

    if let Err(violation) = graph.integrity_report() {
        tracing::error!(learning_path_id, %violation, "learning path failed integrity check");
        return false;
    }

    let analysis = DependencyAnalyzer::new(&graph).analysis();
    tracing::info!(
        learning_path_id,
        total_modules = analysis.total_modules,
        avg_prerequisites = analysis.avg_prerequisites,
        max_depth = analysis.max_prerequisite_depth,
        bottlenecks = analysis.bottleneck_modules.len(),
        critical_path = ?analysis.critical_path,
        difficulty = %infer_path_difficulty(&graph),
        difficulty_score = graph.path_difficulty_score(),
        "learning path audit"
    );
    true
}
