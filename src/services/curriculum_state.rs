use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::cache::keys::{curriculum_state_key, CURRICULUM_STATE_TTL};
use crate::cache::StateCache;
use crate::config::DEFAULT_PASSING_SCORE;
use crate::curriculum::types::{
    ActionKind, AdjustmentAction, ChangeType, CurriculumState, HistoryEntry, PathSnapshot,
    TransitionPhase,
};
use crate::db::{CurriculumStore, StoreError};

/// Durable record of what changed on a learning path and why.
///
/// Reads go through the cache when one is configured; the store stays the
/// source of truth. Writes commit the row update and the history append in
/// one transaction and report failure as `false`.
#[derive(Clone)]
pub struct CurriculumStateManager {
    store: Arc<dyn CurriculumStore>,
    cache: Option<Arc<dyn StateCache>>,
    cache_ttl: Duration,
    passing_score: f64,
}

impl CurriculumStateManager {
    pub fn new(store: Arc<dyn CurriculumStore>, cache: Option<Arc<dyn StateCache>>) -> Self {
        Self {
            store,
            cache,
            cache_ttl: CURRICULUM_STATE_TTL,
            passing_score: DEFAULT_PASSING_SCORE,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_passing_score(mut self, passing_score: f64) -> Self {
        self.passing_score = passing_score;
        self
    }

    pub fn store(&self) -> &Arc<dyn CurriculumStore> {
        &self.store
    }

    pub async fn current_state(
        &self,
        student_id: &str,
        learning_path_id: &str,
    ) -> Result<CurriculumState, StoreError> {
        let key = curriculum_state_key(student_id, learning_path_id);

        if let Some(cached) = self.cache_get(&key).await {
            return Ok(cached);
        }

        let Some(row) = self.store.read_path_row(learning_path_id).await? else {
            debug!(learning_path_id, "learning path not found, returning default state");
            return Ok(CurriculumState::empty(learning_path_id));
        };
        if row.student_id != student_id {
            warn!(learning_path_id, student_id, "learning path belongs to another student");
            return Ok(CurriculumState::empty(learning_path_id));
        }

        let completed_module_ids = self
            .store
            .read_completed_modules(student_id, learning_path_id, self.passing_score)
            .await?;

        let state = CurriculumState {
            learning_path_id: row.id,
            title: row.title,
            difficulty: row.difficulty,
            current_module_id: row.current_module_id,
            progress: row.progress,
            completed_module_ids,
            updated_at: row.updated_at,
        };

        self.cache_set(&key, &state).await;
        Ok(state)
    }

    pub async fn save_adjustment(&self, learning_path_id: &str, actions: &[AdjustmentAction], reason: &str) -> bool {
        let fold = |prev: &PathSnapshot| fold_actions(prev, actions);
        match self
            .store
            .commit_transition(learning_path_id, ChangeType::CurriculumAdjustment, reason, &fold)
            .await
        {
            Ok(Some(entry)) => {
                info!(
                    learning_path_id,
                    history_id = %entry.id,
                    actions = actions.len(),
                    from = %entry.previous_state.difficulty,
                    to = %entry.new_state.difficulty,
                    "saved curriculum adjustment"
                );
                true
            }
            Ok(None) => {
                warn!(learning_path_id, "cannot save adjustment, learning path not found");
                false
            }
            Err(err) => {
                error!(learning_path_id, error = %err, "failed to save curriculum adjustment");
                false
            }
        }
    }

    pub async fn history(&self, learning_path_id: &str, limit: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        self.store.history(learning_path_id, limit).await
    }

    /// `Clean` until the first write, then the phase of the newest entry.
    pub async fn current_phase(&self, learning_path_id: &str) -> Result<TransitionPhase, StoreError> {
        let latest = self.store.history(learning_path_id, 1).await?;
        Ok(latest
            .first()
            .map_or(TransitionPhase::Clean, HistoryEntry::phase))
    }

    /// Restores the state recorded before `history_id` and logs the restore
    /// as its own history entry.
    pub async fn rollback(&self, learning_path_id: &str, history_id: &str) -> bool {
        let target = match self.store.history_entry(learning_path_id, history_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                warn!(learning_path_id, history_id, "rollback target not found");
                return false;
            }
            Err(err) => {
                error!(learning_path_id, history_id, error = %err, "failed to read rollback target");
                return false;
            }
        };

        let reason = format!("Rollback to version {}: {}", target.id, target.reason);
        let restored = target.previous_state.clone();
        let restore = move |_: &PathSnapshot| restored.clone();

        match self
            .store
            .commit_transition(learning_path_id, ChangeType::Rollback, &reason, &restore)
            .await
        {
            Ok(Some(entry)) => {
                info!(
                    learning_path_id,
                    history_id,
                    rollback_id = %entry.id,
                    phase = ?entry.phase(),
                    "rolled back curriculum state"
                );
                true
            }
            Ok(None) => {
                warn!(learning_path_id, "cannot roll back, learning path not found");
                false
            }
            Err(err) => {
                error!(learning_path_id, history_id, error = %err, "failed to roll back curriculum state");
                false
            }
        }
    }

    pub async fn invalidate_cache(&self, student_id: &str, learning_path_id: &str) {
        let Some(cache) = &self.cache else { return };
        let key = curriculum_state_key(student_id, learning_path_id);
        if let Err(err) = cache.delete(&key).await {
            warn!(key = %key, error = %err, "failed to invalidate curriculum cache");
        }
    }

    async fn cache_get(&self, key: &str) -> Option<CurriculumState> {
        let cache = self.cache.as_ref()?;
        let payload = match cache.get(key).await {
            Ok(payload) => payload?,
            Err(err) => {
                warn!(key, error = %err, "curriculum cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(state) => {
                debug!(key, "curriculum cache hit");
                Some(state)
            }
            Err(err) => {
                warn!(key, error = %err, "discarding undecodable cache entry");
                None
            }
        }
    }

    async fn cache_set(&self, key: &str, state: &CurriculumState) {
        let Some(cache) = &self.cache else { return };
        let payload = match serde_json::to_string(state) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(key, error = %err, "failed to encode curriculum state for cache");
                return;
            }
        };
        if let Err(err) = cache.set(key, &payload, self.cache_ttl).await {
            warn!(key, error = %err, "curriculum cache write failed");
        }
    }
}

/// Only difficulty changes move the tracked columns; the last one wins.
pub fn fold_actions(previous: &PathSnapshot, actions: &[AdjustmentAction]) -> PathSnapshot {
    let mut next = previous.clone();
    for action in actions {
        match &action.kind {
            ActionKind::DowngradeDifficulty { to_difficulty, .. }
            | ActionKind::UpgradeDifficulty { to_difficulty, .. } => next.difficulty = *to_difficulty,
            _ => {}
        }
    }
    next
}
