use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::curriculum::graph::{round2, PathGraph};
use crate::curriculum::types::{
    format_percent, ActionKind, AdjustmentAction, Difficulty, LoadTrend, ModuleId, ModuleType,
    ReorderStrategy, StudentMetrics,
};

const TREND_WINDOW: usize = 3;
const TREND_DEAD_ZONE: f64 = 5.0;
const MAX_SUBSTITUTES: usize = 3;
const PLAN_ALTERNATIVES: usize = 2;
const POSTPONE_LOAD_THRESHOLD: f64 = 75.0;
const REVIEW_ACCURACY_THRESHOLD: f64 = 60.0;

pub struct ReorderConstraints<'a> {
    pub graph: &'a PathGraph,
    pub struggling_ids: HashSet<ModuleId>,
    pub target_difficulty: Difficulty,
}

pub struct SubstituteCriteria<'a> {
    pub graph: &'a PathGraph,
    pub max_difficulty: Difficulty,
    /// Restricts candidates further; the target's own type always applies.
    pub module_type: Option<ModuleType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstituteModule {
    pub module_id: ModuleId,
    pub title: String,
    pub difficulty: Difficulty,
    pub estimated_minutes: u32,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingAdjustment {
    pub time_multiplier: f64,
    pub percent: i32,
    pub adjustment_percentage: String,
    pub reasoning: String,
    pub avg_cognitive_load: f64,
    pub trend: LoadTrend,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReshufflingPlan {
    pub actions: Vec<AdjustmentAction>,
    /// One entry per action, same order.
    pub rationale: Vec<String>,
}

impl ReshufflingPlan {
    fn push(&mut self, action: AdjustmentAction, rationale: impl Into<String>) {
        self.actions.push(action);
        self.rationale.push(rationale.into());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConceptReshuffler;

impl ConceptReshuffler {
    pub fn new() -> Self {
        Self
    }

    /// Modules whose title or description mentions a weak topic, case-insensitively.
    pub fn struggling_module_ids(&self, weak_topics: &[String], graph: &PathGraph) -> Vec<ModuleId> {
        let topics: Vec<String> = weak_topics
            .iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        let ids: Vec<ModuleId> = graph
            .modules()
            .iter()
            .filter(|m| {
                let title = m.title.to_lowercase();
                let description = m.description.to_lowercase();
                topics.iter().any(|t| title.contains(t) || description.contains(t))
            })
            .map(|m| m.id.clone())
            .collect();

        info!(
            struggling = ids.len(),
            weak_topics = weak_topics.len(),
            "mapped weak topics to modules"
        );
        ids
    }

    pub fn prerequisite_chain(&self, id: &str, graph: &PathGraph) -> Vec<ModuleId> {
        graph
            .prerequisite_review_chain(id)
            .into_iter()
            .map(|m| m.id.clone())
            .collect()
    }

    /// Greedy priority sort that only ever emits a module once its
    /// prerequisites inside the working set have been emitted.
    pub fn reorder_modules(&self, current_order: &[ModuleId], constraints: &ReorderConstraints<'_>) -> Vec<ModuleId> {
        let mut seen = HashSet::new();
        let mut remaining: Vec<&ModuleId> = current_order.iter().filter(|id| seen.insert(id.as_str())).collect();
        let working: HashSet<&str> = remaining.iter().map(|id| id.as_str()).collect();

        let graph = constraints.graph;
        let prefer_harder = constraints.target_difficulty == Difficulty::Hard;
        let priority = |id: &str| -> (i8, bool) {
            let rank = graph.module(id).map(|m| m.difficulty).unwrap_or_default().rank() as i8;
            let struggling = constraints.struggling_ids.contains(id);
            if prefer_harder {
                (-rank, struggling)
            } else {
                (rank, !struggling)
            }
        };

        let mut placed: HashSet<&str> = HashSet::with_capacity(remaining.len());
        let mut order = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .enumerate()
                .filter(|(_, id)| {
                    graph
                        .prerequisites_of(id)
                        .iter()
                        .all(|p| placed.contains(p.as_str()) || !working.contains(p.as_str()))
                })
                .min_by_key(|(_, id)| priority(id))
                .map(|(i, _)| i);

            let Some(i) = next else {
                warn!(
                    learning_path_id = graph.learning_path_id(),
                    stuck = remaining.len(),
                    "dependency deadlock while reordering, keeping original order for the rest"
                );
                order.extend(remaining.drain(..).cloned());
                break;
            };

            let id = remaining.remove(i);
            placed.insert(id.as_str());
            order.push(id.clone());
        }

        order
    }

    pub fn module_substitutes(&self, id: &str, criteria: &SubstituteCriteria<'_>) -> Vec<SubstituteModule> {
        let Some(target) = criteria.graph.module(id) else {
            return Vec::new();
        };

        let mut substitutes: Vec<SubstituteModule> = criteria
            .graph
            .modules()
            .iter()
            .filter(|m| m.id != target.id)
            .filter(|m| m.difficulty.rank() <= criteria.max_difficulty.rank())
            .filter(|m| criteria.module_type.map_or(true, |t| m.module_type == t))
            .filter(|m| m.module_type == target.module_type)
            .map(|m| {
                let mut similarity = 0.5;
                if m.difficulty == target.difficulty {
                    similarity += 0.2;
                }
                let minutes_apart = m.estimated_minutes.abs_diff(target.estimated_minutes);
                if minutes_apart < 10 {
                    similarity += 0.3;
                } else if minutes_apart < 20 {
                    similarity += 0.15;
                }
                SubstituteModule {
                    module_id: m.id.clone(),
                    title: m.title.clone(),
                    difficulty: m.difficulty,
                    estimated_minutes: m.estimated_minutes,
                    similarity: round2(similarity),
                }
            })
            .collect();

        substitutes.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.difficulty.rank().cmp(&b.difficulty.rank()))
        });
        substitutes.truncate(MAX_SUBSTITUTES);
        substitutes
    }

    pub fn pacing_adjustment(&self, load_history: &[f64]) -> PacingAdjustment {
        if load_history.is_empty() {
            return PacingAdjustment {
                time_multiplier: 1.0,
                percent: 0,
                adjustment_percentage: format_percent(0),
                reasoning: "No cognitive load history available".to_string(),
                avg_cognitive_load: 0.0,
                trend: LoadTrend::Stable,
            };
        }

        let avg = mean(load_history);
        let trend = load_trend(load_history);

        let (multiplier, percent, reasoning) = if avg > 80.0 {
            (
                1.40,
                40,
                format!("High average cognitive load ({avg:.1}) - significantly increasing time allocation"),
            )
        } else if avg > 70.0 {
            (
                1.25,
                25,
                format!("Elevated cognitive load ({avg:.1}) - increasing time allocation"),
            )
        } else if avg < 30.0 && trend != LoadTrend::Increasing {
            // Stable histories accelerate too, not only decreasing ones; a
            // rising low load falls through to the moderate tier.
            (
                0.85,
                -15,
                format!("Low cognitive load ({avg:.1}) without upward trend - can accelerate pace"),
            )
        } else if avg < 40.0 {
            (0.90, -10, format!("Low cognitive load ({avg:.1}) - moderate pace increase"))
        } else {
            (
                1.0,
                0,
                format!("Balanced cognitive load ({avg:.1}) - maintaining current pace"),
            )
        };

        PacingAdjustment {
            time_multiplier: multiplier,
            percent,
            adjustment_percentage: format_percent(percent),
            reasoning,
            avg_cognitive_load: round2(avg),
            trend,
        }
    }

    /// Returns false at the first module placed ahead of one of its in-graph prerequisites.
    pub fn validate_reshuffled_path(&self, order: &[ModuleId], graph: &PathGraph) -> bool {
        let mut seen: HashSet<&str> = HashSet::with_capacity(order.len());
        for id in order {
            for prereq in graph.prerequisites_of(id) {
                if graph.contains(prereq) && !seen.contains(prereq.as_str()) {
                    warn!(
                        learning_path_id = graph.learning_path_id(),
                        module_id = %id,
                        prerequisite_id = %prereq,
                        "module placed before its prerequisite"
                    );
                    return false;
                }
            }
            seen.insert(id.as_str());
        }
        true
    }

    pub fn reshuffling_plan(
        &self,
        graph: &PathGraph,
        metrics: &StudentMetrics,
        current_module_id: Option<&str>,
    ) -> ReshufflingPlan {
        let mut plan = ReshufflingPlan::default();

        if metrics.has_weak_topics() {
            let struggling = self.struggling_module_ids(&metrics.weak_topics, graph);
            plan.push(
                AdjustmentAction::new(
                    ActionKind::InsertPrerequisiteReview {
                        weak_topics: metrics.weak_topics.clone(),
                        struggling_module_ids: struggling,
                    },
                    "Weak topics need foundational review",
                ),
                format!(
                    "Inserting prerequisite review for {} weak topics",
                    metrics.weak_topics.len()
                ),
            );
        }

        if metrics.cognitive_load > POSTPONE_LOAD_THRESHOLD {
            let current: Vec<ModuleId> = graph.modules().iter().map(|m| m.id.clone()).collect();
            let order = self.reorder_modules(
                &current,
                &ReorderConstraints {
                    graph,
                    struggling_ids: HashSet::new(),
                    target_difficulty: Difficulty::Easy,
                },
            );
            plan.push(
                AdjustmentAction::new(
                    ActionKind::ReorderModules {
                        strategy: ReorderStrategy::PostponeHardConcepts,
                        order,
                    },
                    "High cognitive load detected",
                ),
                "Postponing advanced concepts to reduce immediate cognitive burden",
            );
        }

        let pacing = self.pacing_adjustment(&metrics.load_history());
        if pacing.percent != 0 {
            let action = AdjustmentAction::new(
                ActionKind::AdjustPacing {
                    percent: pacing.percent,
                    time_multiplier: pacing.time_multiplier,
                },
                pacing.reasoning.clone(),
            );
            plan.push(action, pacing.reasoning);
        }

        if metrics.quiz_accuracy < REVIEW_ACCURACY_THRESHOLD {
            plan.push(
                AdjustmentAction::new(
                    ActionKind::InsertPracticeModule,
                    "Low quiz accuracy requires reinforcement",
                ),
                "Adding review modules to strengthen foundational understanding",
            );
        }

        if metrics.plateau_detected {
            let completed: HashSet<ModuleId> = metrics.completed_module_ids.iter().cloned().collect();
            let mut alternatives = graph.alternative_sequences(current_module_id.unwrap_or_default(), &completed);
            alternatives.truncate(PLAN_ALTERNATIVES);
            if !alternatives.is_empty() {
                plan.push(
                    AdjustmentAction::new(
                        ActionKind::SuggestAlternativePath { alternatives },
                        "Learning plateau detected",
                    ),
                    "Learning plateau detected - suggesting alternative learning sequences",
                );
            }
        }

        debug!(
            learning_path_id = graph.learning_path_id(),
            actions = plan.actions.len(),
            "built reshuffling plan"
        );
        plan
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of the last three samples against the mean of everything before them.
/// Without earlier samples there is nothing to compare, so the trend is stable.
fn load_trend(history: &[f64]) -> LoadTrend {
    if history.len() <= TREND_WINDOW {
        return LoadTrend::Stable;
    }
    let (older, recent) = history.split_at(history.len() - TREND_WINDOW);
    let delta = mean(recent) - mean(older);
    if delta > TREND_DEAD_ZONE {
        LoadTrend::Increasing
    } else if delta < -TREND_DEAD_ZONE {
        LoadTrend::Decreasing
    } else {
        LoadTrend::Stable
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::graph::tests::module;

    fn ids(v: &[&str]) -> Vec<ModuleId> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn constraints<'a>(graph: &'a PathGraph, struggling: &[&str], target: Difficulty) -> ReorderConstraints<'a> {
        ReorderConstraints {
            graph,
            struggling_ids: struggling.iter().map(|s| s.to_string()).collect(),
            target_difficulty: target,
        }
    }

    fn mixed_path() -> PathGraph {
        PathGraph::new(
            "mixed",
            vec![
                module("h1", Difficulty::Hard, 0, &[]),
                module("m1", Difficulty::Medium, 1, &[]),
                module("e1", Difficulty::Easy, 2, &[]),
                module("e2", Difficulty::Easy, 3, &["h1"]),
            ],
        )
    }

    #[test]
    fn test_pacing_high_load() {
        let pacing = ConceptReshuffler::new().pacing_adjustment(&[85.0, 88.0, 90.0]);
        assert_eq!(pacing.time_multiplier, 1.40);
        assert_eq!(pacing.adjustment_percentage, "+40%");
    }

    #[test]
    fn test_pacing_low_load() {
        let pacing = ConceptReshuffler::new().pacing_adjustment(&[10.0, 12.0, 15.0]);
        assert_eq!(pacing.time_multiplier, 0.85);
        assert_eq!(pacing.adjustment_percentage, "-15%");
    }

    #[test]
    fn test_pacing_rising_low_load_only_moderates() {
        let pacing = ConceptReshuffler::new().pacing_adjustment(&[5.0, 5.0, 5.0, 25.0, 30.0, 35.0]);
        assert_eq!(pacing.trend, LoadTrend::Increasing);
        assert_eq!(pacing.time_multiplier, 0.90);
        assert_eq!(pacing.adjustment_percentage, "-10%");
    }

    #[test]
    fn test_pacing_stable_low_load_accelerates_fully() {
        let pacing = ConceptReshuffler::new().pacing_adjustment(&[20.0; 6]);
        assert_eq!(pacing.trend, LoadTrend::Stable);
        assert_eq!(pacing.time_multiplier, 0.85);
        assert_eq!(pacing.adjustment_percentage, "-15%");

        let falling = ConceptReshuffler::new().pacing_adjustment(&[28.0, 28.0, 28.0, 10.0, 10.0, 10.0]);
        assert_eq!(falling.trend, LoadTrend::Decreasing);
        assert_eq!(falling.time_multiplier, 0.85);
    }

    #[test]
    fn test_pacing_tiers() {
        let reshuffler = ConceptReshuffler::new();
        assert_eq!(reshuffler.pacing_adjustment(&[75.0]).adjustment_percentage, "+25%");
        assert_eq!(reshuffler.pacing_adjustment(&[50.0]).adjustment_percentage, "0%");
        let empty = reshuffler.pacing_adjustment(&[]);
        assert_eq!(empty.time_multiplier, 1.0);
        assert_eq!(empty.reasoning, "No cognitive load history available");
    }

    #[test]
    fn test_load_trend_dead_zone() {
        assert_eq!(load_trend(&[50.0, 50.0, 52.0, 54.0, 55.0]), LoadTrend::Stable);
        assert_eq!(load_trend(&[80.0, 80.0, 60.0, 60.0, 60.0]), LoadTrend::Decreasing);
    }

    #[test]
    fn test_reorder_easy_target_puts_easy_first() {
        let graph = mixed_path();
        let reshuffler = ConceptReshuffler::new();
        let current = ids(&["h1", "m1", "e1", "e2"]);
        let order = reshuffler.reorder_modules(&current, &constraints(&graph, &[], Difficulty::Easy));
        assert_eq!(order, ids(&["e1", "m1", "h1", "e2"]));
        assert!(reshuffler.validate_reshuffled_path(&order, &graph));
    }

    #[test]
    fn test_reorder_hard_target_puts_hard_first() {
        let graph = mixed_path();
        let reshuffler = ConceptReshuffler::new();
        let current = ids(&["e1", "m1", "e2", "h1"]);
        let order = reshuffler.reorder_modules(&current, &constraints(&graph, &[], Difficulty::Hard));
        assert_eq!(order, ids(&["h1", "m1", "e1", "e2"]));
    }

    #[test]
    fn test_reorder_struggling_tie_breaks() {
        let graph = PathGraph::new(
            "ties",
            vec![
                module("a", Difficulty::Easy, 0, &[]),
                module("b", Difficulty::Easy, 1, &[]),
            ],
        );
        let reshuffler = ConceptReshuffler::new();
        let current = ids(&["a", "b"]);

        let easy = reshuffler.reorder_modules(&current, &constraints(&graph, &["b"], Difficulty::Easy));
        assert_eq!(easy, ids(&["b", "a"]));

        let hard = reshuffler.reorder_modules(&current, &constraints(&graph, &["a"], Difficulty::Hard));
        assert_eq!(hard, ids(&["b", "a"]));
    }

    #[test]
    fn test_reorder_deadlock_keeps_original_order() {
        let graph = PathGraph::new(
            "cycle",
            vec![
                module("a", Difficulty::Easy, 0, &["b"]),
                module("b", Difficulty::Easy, 1, &["a"]),
                module("c", Difficulty::Hard, 2, &[]),
            ],
        );
        let current = ids(&["a", "b", "c"]);
        let order = ConceptReshuffler::new().reorder_modules(&current, &constraints(&graph, &[], Difficulty::Easy));
        assert_eq!(order, ids(&["c", "a", "b"]));
    }

    #[test]
    fn test_reorder_ignores_prerequisites_outside_working_set() {
        let graph = mixed_path();
        let current = ids(&["e2", "e1"]);
        let order = ConceptReshuffler::new().reorder_modules(&current, &constraints(&graph, &[], Difficulty::Easy));
        assert_eq!(order, ids(&["e2", "e1"]));
    }

    #[test]
    fn test_validate_rejects_prerequisite_after_dependent() {
        let graph = mixed_path();
        let reshuffler = ConceptReshuffler::new();
        assert!(!reshuffler.validate_reshuffled_path(&ids(&["e2", "h1"]), &graph));
        assert!(reshuffler.validate_reshuffled_path(&ids(&["h1", "e2"]), &graph));
    }

    #[test]
    fn test_struggling_ids_match_title_or_description() {
        let mut fractions = module("f", Difficulty::Easy, 0, &[]);
        fractions.title = "Adding Fractions".to_string();
        let mut decimals = module("d", Difficulty::Easy, 1, &[]);
        decimals.description = "decimal place value".to_string();
        let graph = PathGraph::new("p", vec![fractions, decimals, module("x", Difficulty::Easy, 2, &[])]);

        let topics = vec!["FRACTIONS".to_string(), "Decimal".to_string(), "  ".to_string()];
        assert_eq!(
            ConceptReshuffler::new().struggling_module_ids(&topics, &graph),
            ids(&["f", "d"])
        );
    }

    #[test]
    fn test_substitutes_ranked_by_similarity() {
        let mut target = module("t", Difficulty::Hard, 0, &[]);
        target.estimated_minutes = 30;
        let mut close = module("close", Difficulty::Medium, 1, &[]);
        close.estimated_minutes = 35;
        let mut far = module("far", Difficulty::Easy, 2, &[]);
        far.estimated_minutes = 90;
        let mut mid = module("mid", Difficulty::Easy, 3, &[]);
        mid.estimated_minutes = 45;
        let mut quiz = module("quiz", Difficulty::Easy, 4, &[]);
        quiz.module_type = ModuleType::Quiz;
        let graph = PathGraph::new("p", vec![target, close, far, mid, quiz]);

        let subs = ConceptReshuffler::new().module_substitutes(
            "t",
            &SubstituteCriteria {
                graph: &graph,
                max_difficulty: Difficulty::Medium,
                module_type: None,
            },
        );
        let got: Vec<&str> = subs.iter().map(|s| s.module_id.as_str()).collect();
        assert_eq!(got, vec!["close", "mid", "far"]);
        assert_eq!(subs[0].similarity, 0.8);
        assert_eq!(subs[1].similarity, 0.65);
    }

    #[test]
    fn test_reshuffling_plan_composition() {
        let graph = mixed_path();
        let metrics = StudentMetrics {
            cognitive_load: 85.0,
            quiz_accuracy: 40.0,
            plateau_detected: true,
            weak_topics: vec!["e1".to_string()],
            ..StudentMetrics::default()
        };
        let plan = ConceptReshuffler::new().reshuffling_plan(&graph, &metrics, Some("h1"));
        let types: Vec<&str> = plan.actions.iter().map(|a| a.action_type()).collect();
        assert_eq!(
            types,
            vec![
                "insert_prerequisite_review",
                "reorder_modules",
                "adjust_pacing",
                "insert_practice_module",
                "suggest_alternative_path",
            ]
        );
        assert_eq!(plan.rationale.len(), plan.actions.len());
        match &plan.actions[4].kind {
            ActionKind::SuggestAlternativePath { alternatives } => assert_eq!(alternatives.len(), 2),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn test_reshuffling_plan_empty_for_calm_student() {
        let graph = mixed_path();
        let metrics = StudentMetrics {
            cognitive_load: 50.0,
            quiz_accuracy: 80.0,
            ..StudentMetrics::default()
        };
        let plan = ConceptReshuffler::new().reshuffling_plan(&graph, &metrics, None);
        assert!(plan.actions.is_empty());
        assert!(plan.rationale.is_empty());
    }
}
