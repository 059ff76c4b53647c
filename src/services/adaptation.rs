//! One adaptation cycle for a student on a learning path: read state, plan,
//! score, explain, and commit when the decision is confident enough.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::curriculum::difficulty::DifficultyAdjuster;
use crate::curriculum::graph::{IntegrityViolation, PathGraph};
use crate::curriculum::needs::{analyze_adjustment_needs, is_major_adjustment, template_rationale, Urgency};
use crate::curriculum::reshuffler::ConceptReshuffler;
use crate::curriculum::types::{
    format_percent, ActionKind, AdjustmentAction, Difficulty, StudentMetrics, TransitionPhase,
};
use crate::db::StoreError;
use crate::services::curriculum_state::CurriculumStateManager;

const RESHUFFLE_LOAD_THRESHOLD: f64 = 70.0;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("learning path {learning_path_id} failed integrity check: {violation}")]
    Integrity {
        learning_path_id: String,
        #[source]
        violation: IntegrityViolation,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingChange {
    pub time_multiplier: f64,
    pub adjustment_percentage: String,
    pub reasoning: String,
}

impl Default for PacingChange {
    fn default() -> Self {
        Self {
            time_multiplier: 1.0,
            adjustment_percentage: format_percent(0),
            reasoning: "No pacing changes".to_string(),
        }
    }
}

impl PacingChange {
    /// Taken from the first pacing action of a plan.
    pub fn from_actions(actions: &[AdjustmentAction]) -> Self {
        actions
            .iter()
            .find_map(|action| match &action.kind {
                ActionKind::AdjustPacing {
                    percent,
                    time_multiplier,
                } => Some(Self {
                    time_multiplier: *time_multiplier,
                    adjustment_percentage: format_percent(*percent),
                    reasoning: action.reason.clone(),
                }),
                _ => None,
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdaptationOutcome {
    pub learning_path_id: String,
    pub phase: TransitionPhase,
    pub current_difficulty: Difficulty,
    pub target_difficulty: Difficulty,
    pub confidence: f64,
    pub urgency: Urgency,
    /// Signals severe enough to apply a large plan in one step.
    pub major_adjustment: bool,
    pub reasons: Vec<String>,
    pub actions: Vec<AdjustmentAction>,
    pub rationale: String,
    pub pacing: PacingChange,
}

#[derive(Clone)]
pub struct CurriculumAdapter {
    state: CurriculumStateManager,
    adjuster: DifficultyAdjuster,
    reshuffler: ConceptReshuffler,
}

impl CurriculumAdapter {
    pub fn new(state: CurriculumStateManager) -> Self {
        Self {
            state,
            adjuster: DifficultyAdjuster::new(),
            reshuffler: ConceptReshuffler::new(),
        }
    }

    pub fn with_adjuster(mut self, adjuster: DifficultyAdjuster) -> Self {
        self.adjuster = adjuster;
        self
    }

    pub fn state_manager(&self) -> &CurriculumStateManager {
        &self.state
    }

    /// The read, plan and save steps are separate store calls, so two cycles
    /// on the same path can interleave; the later commit wins.
    pub async fn adapt(
        &self,
        student_id: &str,
        learning_path_id: &str,
        metrics: &StudentMetrics,
    ) -> Result<AdaptationOutcome, AdaptError> {
        let current = self.state.current_state(student_id, learning_path_id).await?;
        let graph = PathGraph::load(self.state.store().as_ref(), learning_path_id).await?;

        if let Err(violation) = graph.integrity_report() {
            warn!(learning_path_id, %violation, "refusing to plan on an invalid learning path");
            return Err(AdaptError::Integrity {
                learning_path_id: learning_path_id.to_string(),
                violation,
            });
        }

        let needs = analyze_adjustment_needs(metrics);
        let decision = self.adjuster.target_difficulty(metrics);

        let mut outcome = AdaptationOutcome {
            learning_path_id: learning_path_id.to_string(),
            phase: TransitionPhase::Clean,
            current_difficulty: current.difficulty,
            target_difficulty: decision.target_difficulty,
            confidence: decision.confidence,
            urgency: needs.urgency,
            major_adjustment: is_major_adjustment(metrics),
            reasons: needs.reasons,
            actions: Vec::new(),
            rationale: template_rationale(&[], metrics),
            pacing: PacingChange::default(),
        };

        if !needs.needs_adjustment {
            info!(student_id, learning_path_id, "no curriculum adjustment needed");
            return Ok(outcome);
        }

        let mut actions = self
            .adjuster
            .adjustment_plan(&graph, decision.target_difficulty, metrics);
        if metrics.has_weak_topics() || metrics.cognitive_load > RESHUFFLE_LOAD_THRESHOLD {
            let plan = self
                .reshuffler
                .reshuffling_plan(&graph, metrics, current.current_module_id.as_deref());
            actions.extend(plan.actions);
        }
        self.adjuster.score_actions(&mut actions);
        if outcome.major_adjustment {
            warn!(
                student_id,
                learning_path_id,
                actions = actions.len(),
                "major curriculum adjustment planned"
            );
        }

        outcome.rationale = template_rationale(&actions, metrics);
        outcome.pacing = PacingChange::from_actions(&actions);
        outcome.phase = TransitionPhase::Pending;

        if !actions.is_empty()
            && self
                .adjuster
                .should_adjust(current.difficulty, decision.target_difficulty, decision.confidence)
        {
            let reason = outcome.reasons.join("; ");
            if self.state.save_adjustment(learning_path_id, &actions, &reason).await {
                self.state.invalidate_cache(student_id, learning_path_id).await;
                outcome.phase = TransitionPhase::Committed;
            }
        }

        info!(
            student_id,
            learning_path_id,
            phase = ?outcome.phase,
            target = %outcome.target_difficulty,
            actions = actions.len(),
            urgency = ?outcome.urgency,
            "adaptation cycle finished"
        );
        outcome.actions = actions;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacing_change_defaults_without_pacing_action() {
        let actions = vec![AdjustmentAction::new(ActionKind::InsertPracticeModule, "practice")];
        assert_eq!(PacingChange::from_actions(&actions), PacingChange::default());
        assert_eq!(PacingChange::default().adjustment_percentage, "0%");
    }

    #[test]
    fn test_pacing_change_uses_first_pacing_action() {
        let actions = vec![
            AdjustmentAction::new(ActionKind::InsertPracticeModule, "practice"),
            AdjustmentAction::pacing(25, "more time"),
            AdjustmentAction::pacing(-15, "less time"),
        ];
        let pacing = PacingChange::from_actions(&actions);
        assert_eq!(pacing.time_multiplier, 1.25);
        assert_eq!(pacing.adjustment_percentage, "+25%");
        assert_eq!(pacing.reasoning, "more time");
    }
}
