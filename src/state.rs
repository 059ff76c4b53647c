use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cache::StateCache;
use crate::config::Config;
use crate::db::CurriculumStore;
use crate::services::adaptation::CurriculumAdapter;
use crate::services::curriculum_state::CurriculumStateManager;

#[derive(Debug)]
pub struct RuntimeConfig {
    pub cache_enabled: AtomicBool,
}

impl RuntimeConfig {
    pub fn new(cache_enabled: bool) -> Self {
        Self {
            cache_enabled: AtomicBool::new(cache_enabled),
        }
    }

    pub fn is_cache_enabled(&self) -> bool {
        self.cache_enabled.load(Ordering::Relaxed)
    }

    pub fn set_cache_enabled(&self, enabled: bool) {
        self.cache_enabled.store(enabled, Ordering::Relaxed);
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(true)
    }
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CurriculumStore>,
    cache: Option<Arc<dyn StateCache>>,
    config: Config,
    runtime: Arc<RuntimeConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn CurriculumStore>, cache: Option<Arc<dyn StateCache>>, config: Config) -> Self {
        Self {
            store,
            cache,
            runtime: Arc::new(RuntimeConfig::new(config.cache_enabled)),
            config,
        }
    }

    pub fn store(&self) -> Arc<dyn CurriculumStore> {
        Arc::clone(&self.store)
    }

    /// `None` while the runtime kill-switch has the cache turned off.
    pub fn cache(&self) -> Option<Arc<dyn StateCache>> {
        if !self.runtime.is_cache_enabled() {
            return None;
        }
        self.cache.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn runtime(&self) -> Arc<RuntimeConfig> {
        Arc::clone(&self.runtime)
    }

    pub fn state_manager(&self) -> CurriculumStateManager {
        CurriculumStateManager::new(self.store(), self.cache())
            .with_cache_ttl(self.config.cache_ttl)
            .with_passing_score(self.config.passing_score)
    }

    pub fn adapter(&self) -> CurriculumAdapter {
        CurriculumAdapter::new(self.state_manager())
    }
}
