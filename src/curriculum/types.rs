use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type ModuleId = String;

const DESCRIPTION_MAX_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    /// easy=1, medium=2, hard=3
    pub fn rank(&self) -> u8 {
        match self {
            Self::Easy => 1,
            Self::Medium => 2,
            Self::Hard => 3,
        }
    }

    pub fn base_score(&self) -> f64 {
        match self {
            Self::Easy => 25.0,
            Self::Medium => 50.0,
            Self::Hard => 75.0,
        }
    }

    pub fn harder(&self) -> Self {
        match self {
            Self::Easy => Self::Medium,
            _ => Self::Hard,
        }
    }

    pub fn easier(&self) -> Self {
        match self {
            Self::Hard => Self::Medium,
            _ => Self::Easy,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "easy" => Self::Easy,
            "hard" => Self::Hard,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    Tutorial,
    Lesson,
    Quiz,
    Exercise,
    Practice,
    Recap,
    Review,
    Assessment,
    #[default]
    #[serde(other)]
    Other,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tutorial => "tutorial",
            Self::Lesson => "lesson",
            Self::Quiz => "quiz",
            Self::Exercise => "exercise",
            Self::Practice => "practice",
            Self::Recap => "recap",
            Self::Review => "review",
            Self::Assessment => "assessment",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "tutorial" => Self::Tutorial,
            "lesson" => Self::Lesson,
            "quiz" => Self::Quiz,
            "exercise" => Self::Exercise,
            "practice" => Self::Practice,
            "recap" => Self::Recap,
            "review" => Self::Review,
            "assessment" => Self::Assessment,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub id: ModuleId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub module_type: ModuleType,
    pub estimated_minutes: u32,
    #[serde(default)]
    pub order_index: i32,
    #[serde(default)]
    pub prerequisites: Vec<ModuleId>,
    #[serde(default)]
    pub is_optional: bool,
}

/// Cuts module content down to a short description on a char boundary.
pub fn truncate_description(content: &str) -> String {
    content.chars().take(DESCRIPTION_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImprovementTrend {
    Improving,
    #[default]
    Stable,
    Declining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoadTrend {
    Increasing,
    #[default]
    Stable,
    Decreasing,
}

impl LoadTrend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Increasing => "increasing",
            Self::Stable => "stable",
            Self::Decreasing => "decreasing",
        }
    }
}

/// Signals produced by the scoring agents upstream of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudentMetrics {
    pub cognitive_load: f64,
    pub quiz_accuracy: f64,
    pub learning_velocity: f64,
    pub engagement_score: f64,
    pub plateau_detected: bool,
    pub improvement_trend: ImprovementTrend,
    pub weak_topics: Vec<String>,
    pub cognitive_load_history: Vec<f64>,
    pub completed_module_ids: Vec<ModuleId>,
    pub dropout_risk: f64,
}

impl Default for StudentMetrics {
    fn default() -> Self {
        Self {
            cognitive_load: 50.0,
            quiz_accuracy: 0.0,
            learning_velocity: 0.0,
            engagement_score: 0.0,
            plateau_detected: false,
            improvement_trend: ImprovementTrend::Stable,
            weak_topics: Vec::new(),
            cognitive_load_history: Vec::new(),
            completed_module_ids: Vec::new(),
            dropout_risk: 0.0,
        }
    }
}

impl StudentMetrics {
    pub fn has_weak_topics(&self) -> bool {
        !self.weak_topics.is_empty()
    }

    pub fn load_history(&self) -> Vec<f64> {
        if self.cognitive_load_history.is_empty() {
            vec![self.cognitive_load]
        } else {
            self.cognitive_load_history.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImpactEstimate {
    pub cognitive_load_change: i32,
    pub time_change_minutes: i32,
    pub success_rate_change: i32,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReorderStrategy {
    PostponeHardConcepts,
    DependencyPriority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    DowngradeDifficulty {
        module_id: ModuleId,
        module_title: String,
        from_difficulty: Difficulty,
        to_difficulty: Difficulty,
    },
    UpgradeDifficulty {
        module_id: ModuleId,
        module_title: String,
        from_difficulty: Difficulty,
        to_difficulty: Difficulty,
    },
    InsertPrerequisiteReview {
        weak_topics: Vec<String>,
        #[serde(default)]
        struggling_module_ids: Vec<ModuleId>,
    },
    AdjustPacing {
        /// Signed percentage applied to time allocation, e.g. 25 for "+25%".
        percent: i32,
        time_multiplier: f64,
    },
    InsertPracticeModule,
    SkipModule {
        module_id: ModuleId,
        module_title: String,
    },
    ReorderModules {
        strategy: ReorderStrategy,
        #[serde(default)]
        order: Vec<ModuleId>,
    },
    SuggestAlternativePath {
        alternatives: Vec<Vec<ModuleId>>,
    },
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DowngradeDifficulty { .. } => "downgrade_difficulty",
            Self::UpgradeDifficulty { .. } => "upgrade_difficulty",
            Self::InsertPrerequisiteReview { .. } => "insert_prerequisite_review",
            Self::AdjustPacing { .. } => "adjust_pacing",
            Self::InsertPracticeModule => "insert_practice_module",
            Self::SkipModule { .. } => "skip_module",
            Self::ReorderModules { .. } => "reorder_modules",
            Self::SuggestAlternativePath { .. } => "suggest_alternative_path",
        }
    }
}

/// One step of an adjustment plan. `estimated_impact` is filled in once the
/// action has been scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentAction {
    #[serde(flatten)]
    pub kind: ActionKind,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_impact: Option<ImpactEstimate>,
}

impl AdjustmentAction {
    pub fn new(kind: ActionKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            estimated_impact: None,
        }
    }

    pub fn pacing(percent: i32, reason: impl Into<String>) -> Self {
        let time_multiplier = ((100 + percent) as f64 / 100.0 * 100.0).round() / 100.0;
        Self::new(
            ActionKind::AdjustPacing {
                percent,
                time_multiplier,
            },
            reason,
        )
    }

    pub fn action_type(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// Formats a signed pacing percentage the way plans present it: "+25%", "-15%", "0%".
pub fn format_percent(percent: i32) -> String {
    if percent > 0 {
        format!("+{percent}%")
    } else {
        format!("{percent}%")
    }
}

/// The three path-row fields tracked by history snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathSnapshot {
    pub difficulty: Difficulty,
    pub current_module_id: Option<ModuleId>,
    pub progress: f64,
}

impl Default for PathSnapshot {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Medium,
            current_module_id: None,
            progress: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumState {
    pub learning_path_id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub difficulty: Difficulty,
    pub current_module_id: Option<ModuleId>,
    pub progress: f64,
    pub completed_module_ids: BTreeSet<ModuleId>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CurriculumState {
    /// Zero-value state returned for paths the store does not know about.
    pub fn empty(learning_path_id: &str) -> Self {
        Self {
            learning_path_id: learning_path_id.to_string(),
            title: None,
            difficulty: Difficulty::Medium,
            current_module_id: None,
            progress: 0.0,
            completed_module_ids: BTreeSet::new(),
            updated_at: None,
        }
    }

    pub fn snapshot(&self) -> PathSnapshot {
        PathSnapshot {
            difficulty: self.difficulty,
            current_module_id: self.current_module_id.clone(),
            progress: self.progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    CurriculumAdjustment,
    Rollback,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurriculumAdjustment => "curriculum_adjustment",
            Self::Rollback => "rollback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "curriculum_adjustment" => Some(Self::CurriculumAdjustment),
            "rollback" => Some(Self::Rollback),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub learning_path_id: String,
    pub change_type: ChangeType,
    pub previous_state: PathSnapshot,
    pub new_state: PathSnapshot,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// Phase the path entered when this entry was written.
    pub fn phase(&self) -> TransitionPhase {
        match self.change_type {
            ChangeType::CurriculumAdjustment => TransitionPhase::Committed,
            ChangeType::Rollback => TransitionPhase::RolledBack,
        }
    }
}

/// Where a path sits in its adjustment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPhase {
    Clean,
    Pending,
    Committed,
    RolledBack,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_rank_and_parse() {
        assert!(Difficulty::Easy.rank() < Difficulty::Medium.rank());
        assert!(Difficulty::Medium.rank() < Difficulty::Hard.rank());
        assert_eq!(Difficulty::parse("HARD"), Difficulty::Hard);
        assert_eq!(Difficulty::parse("unknown"), Difficulty::Medium);
        assert_eq!(Difficulty::Hard.easier(), Difficulty::Medium);
        assert_eq!(Difficulty::Easy.easier(), Difficulty::Easy);
    }

    #[test]
    fn test_action_serializes_with_type_tag() {
        let action = AdjustmentAction::pacing(25, "more time");
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "adjust_pacing");
        assert_eq!(value["percent"], 25);
        assert_eq!(value["time_multiplier"], 1.25);

        let back: AdjustmentAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_format_percent() {
        assert_eq!(format_percent(25), "+25%");
        assert_eq!(format_percent(-15), "-15%");
        assert_eq!(format_percent(0), "0%");
    }

    #[test]
    fn test_truncate_description_respects_char_boundaries() {
        let long = "é".repeat(300);
        assert_eq!(truncate_description(&long).chars().count(), 200);
        assert_eq!(truncate_description("short"), "short");
    }

    #[test]
    fn test_metrics_defaults_when_fields_missing() {
        let metrics: StudentMetrics = serde_json::from_str(r#"{"quizAccuracy": 72}"#).unwrap();
        assert_eq!(metrics.cognitive_load, 50.0);
        assert_eq!(metrics.quiz_accuracy, 72.0);
        assert_eq!(metrics.load_history(), vec![50.0]);
    }

    #[test]
    fn test_history_entry_phase_follows_change_type() {
        let mut entry = HistoryEntry {
            id: "h1".to_string(),
            learning_path_id: "p".to_string(),
            change_type: ChangeType::CurriculumAdjustment,
            previous_state: PathSnapshot::default(),
            new_state: PathSnapshot::default(),
            reason: String::new(),
            timestamp: Utc::now(),
        };
        assert_eq!(entry.phase(), TransitionPhase::Committed);
        entry.change_type = ChangeType::Rollback;
        assert_eq!(entry.phase(), TransitionPhase::RolledBack);
    }
}
