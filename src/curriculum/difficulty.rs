use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::curriculum::graph::{round2, PathGraph};
use crate::curriculum::types::{
    ActionKind, AdjustmentAction, Difficulty, ImpactEstimate, ImprovementTrend, Module,
    ModuleType, RiskLevel, StudentMetrics,
};

const WEIGHT_COGNITIVE_LOAD: f64 = 0.40;
const WEIGHT_QUIZ_ACCURACY: f64 = 0.30;
const WEIGHT_LEARNING_VELOCITY: f64 = 0.20;
const WEIGHT_ENGAGEMENT: f64 = 0.10;

const EASY_CONFIDENCE: f64 = 0.85;
const HARD_CONFIDENCE: f64 = 0.90;
const MEDIUM_CONFIDENCE: f64 = 0.75;

const REDUCTION_PACING_PERCENT: i32 = 25;
const INCREASE_PACING_PERCENT: i32 = -15;
const PRACTICE_ACCURACY_THRESHOLD: f64 = 60.0;
const MEDIUM_TO_HARD_ACCURACY: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyThresholds {
    pub cognitive_load_high: f64,
    pub cognitive_load_low: f64,
    pub quiz_accuracy_low: f64,
    pub quiz_accuracy_high: f64,
    pub engagement: f64,
    pub raise_confidence: f64,
    pub lower_confidence: f64,
}

impl Default for DifficultyThresholds {
    fn default() -> Self {
        Self {
            cognitive_load_high: 75.0,
            cognitive_load_low: 30.0,
            quiz_accuracy_low: 50.0,
            quiz_accuracy_high: 85.0,
            engagement: 60.0,
            raise_confidence: 0.85,
            lower_confidence: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    pub cognitive_readiness: f64,
    pub accuracy_score: f64,
    pub velocity_score: f64,
    pub engagement_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifficultyDecision {
    pub target_difficulty: Difficulty,
    pub confidence: f64,
    pub readiness: f64,
    pub reasoning: Vec<String>,
    pub component_scores: ComponentScores,
}

#[derive(Debug, Clone, Default)]
pub struct DifficultyAdjuster {
    thresholds: DifficultyThresholds,
}

impl DifficultyAdjuster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: DifficultyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &DifficultyThresholds {
        &self.thresholds
    }

    pub fn target_difficulty(&self, metrics: &StudentMetrics) -> DifficultyDecision {
        let t = &self.thresholds;
        let load = metrics.cognitive_load;
        let accuracy = metrics.quiz_accuracy;

        let components = ComponentScores {
            cognitive_readiness: round2(100.0 - load),
            accuracy_score: round2(accuracy),
            velocity_score: round2(((metrics.learning_velocity + 5.0) * 10.0).clamp(0.0, 100.0)),
            engagement_score: round2(metrics.engagement_score),
        };
        let readiness = round2(
            components.cognitive_readiness * WEIGHT_COGNITIVE_LOAD
                + components.accuracy_score * WEIGHT_QUIZ_ACCURACY
                + components.velocity_score * WEIGHT_LEARNING_VELOCITY
                + components.engagement_score * WEIGHT_ENGAGEMENT,
        );

        let overloaded = load > t.cognitive_load_high;
        let inaccurate = accuracy < t.quiz_accuracy_low;

        let (target, confidence, reasoning) = if metrics.plateau_detected || overloaded || inaccurate {
            let mut reasoning = Vec::new();
            if metrics.plateau_detected {
                reasoning.push("learning plateau detected".to_string());
            }
            if overloaded {
                reasoning.push(format!("high cognitive load ({load})"));
            }
            if inaccurate {
                reasoning.push(format!("low quiz accuracy ({accuracy}%)"));
            }
            (Difficulty::Easy, EASY_CONFIDENCE, reasoning)
        } else if load < t.cognitive_load_low
            && accuracy > t.quiz_accuracy_high
            && metrics.engagement_score > t.engagement
            && metrics.improvement_trend == ImprovementTrend::Improving
        {
            let reasoning = vec![
                format!("low cognitive load ({load})"),
                format!("high quiz accuracy ({accuracy}%)"),
                format!("strong engagement ({})", metrics.engagement_score),
                "improving trend".to_string(),
            ];
            (Difficulty::Hard, HARD_CONFIDENCE, reasoning)
        } else {
            (
                Difficulty::Medium,
                MEDIUM_CONFIDENCE,
                vec!["balanced performance metrics".to_string()],
            )
        };

        debug!(target_difficulty = %target, confidence, readiness, "computed target difficulty");

        DifficultyDecision {
            target_difficulty: target,
            confidence,
            readiness,
            reasoning,
            component_scores: components,
        }
    }

    /// Raising difficulty demands more confidence than lowering it.
    pub fn should_adjust(&self, current: Difficulty, target: Difficulty, confidence: f64) -> bool {
        if current == target {
            return false;
        }
        if target.rank() > current.rank() {
            confidence >= self.thresholds.raise_confidence
        } else {
            confidence >= self.thresholds.lower_confidence
        }
    }

    pub fn adjustment_plan(
        &self,
        graph: &PathGraph,
        target: Difficulty,
        metrics: &StudentMetrics,
    ) -> Vec<AdjustmentAction> {
        let current = infer_path_difficulty(graph);
        let plan = match target.rank().cmp(&current.rank()) {
            std::cmp::Ordering::Less => reduction_plan(graph, metrics),
            std::cmp::Ordering::Greater => increase_plan(graph, metrics),
            std::cmp::Ordering::Equal => Vec::new(),
        };
        debug!(
            learning_path_id = graph.learning_path_id(),
            current = %current,
            target = %target,
            actions = plan.len(),
            "built difficulty adjustment plan"
        );
        plan
    }

    pub fn estimate_impact(&self, action: &AdjustmentAction) -> ImpactEstimate {
        estimate_impact(&action.kind)
    }

    /// Fills `estimated_impact` on every action that has not been scored yet.
    pub fn score_actions(&self, actions: &mut [AdjustmentAction]) {
        for action in actions.iter_mut() {
            if action.estimated_impact.is_none() {
                action.estimated_impact = Some(estimate_impact(&action.kind));
            }
        }
    }
}

fn impact(cognitive_load_change: i32, time_change_minutes: i32, success_rate_change: i32, risk_level: RiskLevel) -> ImpactEstimate {
    ImpactEstimate {
        cognitive_load_change,
        time_change_minutes,
        success_rate_change,
        risk_level,
    }
}

pub fn estimate_impact(kind: &ActionKind) -> ImpactEstimate {
    match kind {
        ActionKind::DowngradeDifficulty { .. } => impact(-10, 0, 15, RiskLevel::Low),
        ActionKind::UpgradeDifficulty { .. } => impact(15, 0, -5, RiskLevel::Medium),
        ActionKind::InsertPrerequisiteReview { .. } => impact(-5, 30, 10, RiskLevel::Low),
        ActionKind::AdjustPacing { percent, .. } if *percent > 0 => impact(0, 45, 5, RiskLevel::Low),
        ActionKind::AdjustPacing { percent, .. } if *percent < 0 => impact(5, -30, 0, RiskLevel::Low),
        ActionKind::InsertPracticeModule => impact(0, 20, 12, RiskLevel::Low),
        ActionKind::SkipModule { .. } => impact(0, -15, 0, RiskLevel::Medium),
        _ => ImpactEstimate::default(),
    }
}

/// Most frequent module difficulty. Ties go to the harder level; an empty path is medium.
pub fn infer_path_difficulty(graph: &PathGraph) -> Difficulty {
    if graph.is_empty() {
        return Difficulty::Medium;
    }
    let mut counts = [0usize; 3];
    for module in graph.modules() {
        counts[usize::from(module.difficulty.rank() - 1)] += 1;
    }
    Difficulty::ALL
        .iter()
        .copied()
        .max_by_key(|d| counts[usize::from(d.rank() - 1)])
        .unwrap_or_default()
}

fn difficulty_change(module: &Module, to: Difficulty, upgrade: bool, reason: &str) -> AdjustmentAction {
    let module_id = module.id.clone();
    let module_title = module.title.clone();
    let from_difficulty = module.difficulty;
    let kind = if upgrade {
        ActionKind::UpgradeDifficulty {
            module_id,
            module_title,
            from_difficulty,
            to_difficulty: to,
        }
    } else {
        ActionKind::DowngradeDifficulty {
            module_id,
            module_title,
            from_difficulty,
            to_difficulty: to,
        }
    };
    AdjustmentAction::new(kind, reason)
}

fn reduction_plan(graph: &PathGraph, metrics: &StudentMetrics) -> Vec<AdjustmentAction> {
    let mut plan = Vec::new();
    let weak = metrics.has_weak_topics();

    for module in graph.modules() {
        match module.difficulty {
            Difficulty::Hard => plan.push(difficulty_change(module, Difficulty::Medium, false, "Reducing cognitive load")),
            Difficulty::Medium if weak => {
                plan.push(difficulty_change(module, Difficulty::Easy, false, "Supporting struggling topics"))
            }
            _ => {}
        }
    }

    if weak {
        plan.push(AdjustmentAction::new(
            ActionKind::InsertPrerequisiteReview {
                weak_topics: metrics.weak_topics.clone(),
                struggling_module_ids: Vec::new(),
            },
            "Reinforcing foundational concepts",
        ));
    }

    plan.push(AdjustmentAction::pacing(
        REDUCTION_PACING_PERCENT,
        "Allowing more time for concept mastery",
    ));

    if metrics.quiz_accuracy < PRACTICE_ACCURACY_THRESHOLD {
        plan.push(AdjustmentAction::new(
            ActionKind::InsertPracticeModule,
            "Additional practice needed for concept reinforcement",
        ));
    }

    plan
}

fn increase_plan(graph: &PathGraph, metrics: &StudentMetrics) -> Vec<AdjustmentAction> {
    let mut plan = Vec::new();

    for module in graph.modules() {
        match module.difficulty {
            Difficulty::Easy => plan.push(difficulty_change(
                module,
                Difficulty::Medium,
                true,
                "Student ready for increased challenge",
            )),
            Difficulty::Medium if metrics.quiz_accuracy > MEDIUM_TO_HARD_ACCURACY => plan.push(difficulty_change(
                module,
                Difficulty::Hard,
                true,
                "Exceptional performance - advancing complexity",
            )),
            _ => {}
        }
    }

    for module in graph.modules() {
        if module.module_type == ModuleType::Review && module.is_optional {
            plan.push(AdjustmentAction::new(
                ActionKind::SkipModule {
                    module_id: module.id.clone(),
                    module_title: module.title.clone(),
                },
                "Review not needed - strong foundational knowledge",
            ));
        }
    }

    plan.push(AdjustmentAction::pacing(
        INCREASE_PACING_PERCENT,
        "Student demonstrating strong comprehension - accelerating pace",
    ));

    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::graph::tests::module;

    fn metrics(load: f64, accuracy: f64) -> StudentMetrics {
        StudentMetrics {
            cognitive_load: load,
            quiz_accuracy: accuracy,
            ..StudentMetrics::default()
        }
    }

    fn linear_path() -> PathGraph {
        PathGraph::new(
            "path-1",
            vec![
                module("M1", Difficulty::Easy, 0, &[]),
                module("M2", Difficulty::Medium, 1, &["M1"]),
                module("M3", Difficulty::Hard, 2, &["M2"]),
            ],
        )
    }

    #[test]
    fn test_high_load_overrides_good_accuracy() {
        let decision = DifficultyAdjuster::new().target_difficulty(&metrics(80.0, 90.0));
        assert_eq!(decision.target_difficulty, Difficulty::Easy);
        assert_eq!(decision.confidence, 0.85);
        assert_eq!(decision.reasoning, vec!["high cognitive load (80)"]);
    }

    #[test]
    fn test_ready_student_gets_hard() {
        let m = StudentMetrics {
            cognitive_load: 20.0,
            quiz_accuracy: 90.0,
            engagement_score: 70.0,
            improvement_trend: ImprovementTrend::Improving,
            ..StudentMetrics::default()
        };
        let decision = DifficultyAdjuster::new().target_difficulty(&m);
        assert_eq!(decision.target_difficulty, Difficulty::Hard);
        assert_eq!(decision.confidence, 0.90);
        assert_eq!(decision.reasoning.len(), 4);
    }

    #[test]
    fn test_balanced_metrics_stay_medium() {
        let decision = DifficultyAdjuster::new().target_difficulty(&metrics(50.0, 70.0));
        assert_eq!(decision.target_difficulty, Difficulty::Medium);
        assert_eq!(decision.confidence, 0.75);
    }

    #[test]
    fn test_readiness_weights() {
        let m = StudentMetrics {
            cognitive_load: 40.0,
            quiz_accuracy: 80.0,
            learning_velocity: 0.0,
            engagement_score: 50.0,
            ..StudentMetrics::default()
        };
        let decision = DifficultyAdjuster::new().target_difficulty(&m);
        // 0.4*60 + 0.3*80 + 0.2*50 + 0.1*50
        assert_eq!(decision.readiness, 63.0);
        assert_eq!(decision.component_scores.velocity_score, 50.0);
    }

    #[test]
    fn test_velocity_score_is_clamped() {
        let m = StudentMetrics {
            learning_velocity: 20.0,
            ..metrics(50.0, 70.0)
        };
        let decision = DifficultyAdjuster::new().target_difficulty(&m);
        assert_eq!(decision.component_scores.velocity_score, 100.0);
    }

    #[test]
    fn test_should_adjust_is_asymmetric() {
        let adjuster = DifficultyAdjuster::new();
        assert!(!adjuster.should_adjust(Difficulty::Medium, Difficulty::Hard, 0.80));
        assert!(adjuster.should_adjust(Difficulty::Medium, Difficulty::Hard, 0.90));
        assert!(adjuster.should_adjust(Difficulty::Medium, Difficulty::Easy, 0.80));
        assert!(!adjuster.should_adjust(Difficulty::Medium, Difficulty::Medium, 0.99));
    }

    #[test]
    fn test_reduction_plan_for_struggling_student() {
        let graph = linear_path();
        let m = StudentMetrics {
            weak_topics: vec!["M2".to_string()],
            ..metrics(80.0, 55.0)
        };
        let plan = DifficultyAdjuster::new().adjustment_plan(&graph, Difficulty::Easy, &m);
        let types: Vec<&str> = plan.iter().map(|a| a.action_type()).collect();
        assert_eq!(
            types,
            vec![
                "downgrade_difficulty",
                "downgrade_difficulty",
                "insert_prerequisite_review",
                "adjust_pacing",
                "insert_practice_module",
            ]
        );
        assert!(matches!(
            &plan[0].kind,
            ActionKind::DowngradeDifficulty { module_id, to_difficulty: Difficulty::Easy, .. } if module_id == "M2"
        ));
        assert!(matches!(
            &plan[1].kind,
            ActionKind::DowngradeDifficulty { module_id, to_difficulty: Difficulty::Medium, .. } if module_id == "M3"
        ));
        assert!(matches!(plan[3].kind, ActionKind::AdjustPacing { percent: 25, .. }));
    }

    #[test]
    fn test_increase_plan_skips_optional_reviews() {
        let mut review = module("R", Difficulty::Easy, 3, &[]);
        review.module_type = ModuleType::Review;
        review.is_optional = true;
        let graph = PathGraph::new(
            "p",
            vec![
                module("a", Difficulty::Easy, 0, &[]),
                module("b", Difficulty::Easy, 1, &[]),
                module("c", Difficulty::Medium, 2, &[]),
                review,
            ],
        );
        let plan = DifficultyAdjuster::new().adjustment_plan(&graph, Difficulty::Medium, &metrics(40.0, 80.0));
        let types: Vec<&str> = plan.iter().map(|a| a.action_type()).collect();
        assert_eq!(
            types,
            vec![
                "upgrade_difficulty",
                "upgrade_difficulty",
                "upgrade_difficulty",
                "skip_module",
                "adjust_pacing",
            ]
        );
    }

    #[test]
    fn test_no_plan_when_target_matches() {
        let graph = PathGraph::new("p", vec![module("a", Difficulty::Medium, 0, &[])]);
        let plan = DifficultyAdjuster::new().adjustment_plan(&graph, Difficulty::Medium, &metrics(50.0, 70.0));
        assert!(plan.is_empty());
    }

    #[test]
    fn test_infer_difficulty_ties_go_harder() {
        assert_eq!(infer_path_difficulty(&linear_path()), Difficulty::Hard);
        assert_eq!(infer_path_difficulty(&PathGraph::new("e", vec![])), Difficulty::Medium);
    }

    #[test]
    fn test_estimate_impact_table() {
        let adjuster = DifficultyAdjuster::new();
        let faster = AdjustmentAction::pacing(-15, "faster");
        let slower = AdjustmentAction::pacing(25, "slower");
        let practice = AdjustmentAction::new(ActionKind::InsertPracticeModule, "practice");

        assert_eq!(adjuster.estimate_impact(&slower), impact(0, 45, 5, RiskLevel::Low));
        assert_eq!(adjuster.estimate_impact(&faster), impact(5, -30, 0, RiskLevel::Low));
        assert_eq!(adjuster.estimate_impact(&practice), impact(0, 20, 12, RiskLevel::Low));
        assert_eq!(
            adjuster.estimate_impact(&AdjustmentAction::pacing(0, "steady")),
            ImpactEstimate::default()
        );
    }
}
