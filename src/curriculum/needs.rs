//! Decides whether a student's signals warrant touching the curriculum at all,
//! and explains a finished plan in plain language.

use serde::{Deserialize, Serialize};

use crate::curriculum::types::{AdjustmentAction, ImprovementTrend, StudentMetrics};

const LOAD_THRESHOLD: f64 = 70.0;
const ACCURACY_THRESHOLD: f64 = 60.0;
const WEAK_TOPIC_THRESHOLD: usize = 2;
const DROPOUT_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    #[default]
    Low,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentNeeds {
    pub needs_adjustment: bool,
    pub urgency: Urgency,
    pub reasons: Vec<String>,
}

pub fn analyze_adjustment_needs(metrics: &StudentMetrics) -> AdjustmentNeeds {
    let mut urgency = Urgency::Low;
    let mut reasons = Vec::new();
    let load = metrics.cognitive_load;
    let accuracy = metrics.quiz_accuracy;

    if load > LOAD_THRESHOLD {
        urgency = urgency.max(Urgency::High);
        reasons.push(format!("High cognitive load ({load})"));
    }
    if accuracy < ACCURACY_THRESHOLD {
        urgency = urgency.max(Urgency::High);
        reasons.push(format!("Low quiz accuracy ({accuracy}%)"));
    }
    if metrics.weak_topics.len() >= WEAK_TOPIC_THRESHOLD {
        reasons.push(format!("{} weak topics identified", metrics.weak_topics.len()));
    }
    if metrics.plateau_detected {
        reasons.push("Learning plateau detected".to_string());
    }
    if metrics.dropout_risk > DROPOUT_THRESHOLD {
        urgency = Urgency::Critical;
        reasons.push(format!("High dropout risk ({:.0}%)", metrics.dropout_risk * 100.0));
    }
    if load < 30.0 && accuracy > 85.0 && metrics.improvement_trend == ImprovementTrend::Improving {
        reasons.push("Opportunity to increase challenge level".to_string());
    }

    AdjustmentNeeds {
        needs_adjustment: !reasons.is_empty(),
        urgency,
        reasons,
    }
}

/// Signals severe enough that a plan should be applied even if it is large.
pub fn is_major_adjustment(metrics: &StudentMetrics) -> bool {
    metrics.cognitive_load > 85.0
        || metrics.quiz_accuracy < 40.0
        || (metrics.plateau_detected && metrics.weak_topics.len() >= 3)
}

/// Deterministic explanation of a plan for the student.
pub fn template_rationale(actions: &[AdjustmentAction], metrics: &StudentMetrics) -> String {
    if actions.is_empty() {
        return "Your current learning path is well-matched to your progress. Keep up the great work!".to_string();
    }

    let load = metrics.cognitive_load;
    let accuracy = metrics.quiz_accuracy;

    if load > LOAD_THRESHOLD {
        format!(
            "We've noticed your cognitive load is elevated ({load}/100). We're adjusting your curriculum to \
             include more foundational review and reducing difficulty to help you master concepts at a \
             comfortable pace."
        )
    } else if accuracy < ACCURACY_THRESHOLD {
        format!(
            "Your recent quiz performance ({accuracy}%) suggests we should reinforce some key concepts. \
             We've added review modules and adjusted difficulty to ensure you build a strong foundation \
             before advancing."
        )
    } else if accuracy > 85.0 && load < 40.0 {
        "You're doing exceptionally well! We're increasing the challenge level and introducing more \
         advanced concepts to keep you engaged and accelerate your learning."
            .to_string()
    } else {
        "We're fine-tuning your learning path based on your progress patterns. These adjustments will \
         help optimize your learning experience and outcomes."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::types::ActionKind;

    #[test]
    fn test_calm_student_needs_nothing() {
        let metrics = StudentMetrics {
            cognitive_load: 50.0,
            quiz_accuracy: 75.0,
            ..StudentMetrics::default()
        };
        let needs = analyze_adjustment_needs(&metrics);
        assert!(!needs.needs_adjustment);
        assert_eq!(needs.urgency, Urgency::Low);
        assert!(needs.reasons.is_empty());
    }

    #[test]
    fn test_overloaded_student_is_high_urgency() {
        let metrics = StudentMetrics {
            cognitive_load: 80.0,
            quiz_accuracy: 55.0,
            weak_topics: vec!["a".into(), "b".into()],
            ..StudentMetrics::default()
        };
        let needs = analyze_adjustment_needs(&metrics);
        assert!(needs.needs_adjustment);
        assert_eq!(needs.urgency, Urgency::High);
        assert_eq!(
            needs.reasons,
            vec![
                "High cognitive load (80)",
                "Low quiz accuracy (55%)",
                "2 weak topics identified",
            ]
        );
    }

    #[test]
    fn test_dropout_risk_is_critical() {
        let metrics = StudentMetrics {
            quiz_accuracy: 70.0,
            dropout_risk: 0.7,
            ..StudentMetrics::default()
        };
        let needs = analyze_adjustment_needs(&metrics);
        assert_eq!(needs.urgency, Urgency::Critical);
        assert_eq!(needs.reasons, vec!["High dropout risk (70%)"]);
    }

    #[test]
    fn test_excellence_is_low_urgency_opportunity() {
        let metrics = StudentMetrics {
            cognitive_load: 20.0,
            quiz_accuracy: 92.0,
            improvement_trend: ImprovementTrend::Improving,
            ..StudentMetrics::default()
        };
        let needs = analyze_adjustment_needs(&metrics);
        assert!(needs.needs_adjustment);
        assert_eq!(needs.urgency, Urgency::Low);
    }

    #[test]
    fn test_major_adjustment_triggers() {
        assert!(is_major_adjustment(&StudentMetrics {
            cognitive_load: 90.0,
            quiz_accuracy: 70.0,
            ..StudentMetrics::default()
        }));
        assert!(!is_major_adjustment(&StudentMetrics {
            quiz_accuracy: 70.0,
            ..StudentMetrics::default()
        }));
    }

    #[test]
    fn test_template_rationale_branches() {
        let actions = vec![AdjustmentAction::new(ActionKind::InsertPracticeModule, "practice")];
        let overloaded = StudentMetrics {
            cognitive_load: 80.0,
            ..StudentMetrics::default()
        };
        assert!(template_rationale(&actions, &overloaded).contains("(80/100)"));

        let struggling = StudentMetrics {
            cognitive_load: 50.0,
            quiz_accuracy: 45.0,
            ..StudentMetrics::default()
        };
        assert!(template_rationale(&actions, &struggling).contains("(45%)"));

        assert!(template_rationale(&[], &overloaded).starts_with("Your current learning path"));
    }
}
