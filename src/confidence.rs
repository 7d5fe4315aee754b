// ✅ Confidence Scoring
// Rates how far a state-year verdict can be trusted from the completeness of
// its inputs. Scorers are pluggable so the policy can change without touching
// classification.

use crate::aggregator::StateYearAggregate;
use crate::rules::StateThresholdRule;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Verdict may be wrong
    Warning,  // Verdict likely right but inputs are incomplete
    Info,     // Cosmetic gaps
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceIssue {
    pub severity: Severity,
    pub issue: String,
}

/// Completeness facts about one state-year
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfidenceInputs {
    pub transaction_count: u64,
    pub ambiguous_channel_count: u64,
    pub missing_id_count: u64,
    pub repeated_row_count: u64,
    pub rule_missing: bool,
    pub rule_estimated: bool,
}

impl ConfidenceInputs {
    pub fn from_parts(agg: Option<&StateYearAggregate>, rule: Option<&StateThresholdRule>) -> Self {
        ConfidenceInputs {
            transaction_count: agg.map_or(0, |a| a.transaction_count),
            ambiguous_channel_count: agg.map_or(0, |a| a.ambiguous_channel_count),
            missing_id_count: agg.map_or(0, |a| a.missing_id_count),
            repeated_row_count: agg.map_or(0, |a| a.repeated_row_count),
            rule_missing: rule.is_none(),
            rule_estimated: rule.map_or(false, |r| r.estimated),
        }
    }

    fn share(&self, count: u64) -> f64 {
        if self.transaction_count == 0 {
            0.0
        } else {
            count as f64 / self.transaction_count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAssessment {
    pub level: ConfidenceLevel,
    pub issues: Vec<ConfidenceIssue>,
}

impl ConfidenceAssessment {
    /// Level implied by the worst issue
    pub fn from_issues(issues: Vec<ConfidenceIssue>) -> Self {
        let level = if issues.iter().any(|i| i.severity == Severity::Critical) {
            ConfidenceLevel::Low
        } else if issues.iter().any(|i| i.severity == Severity::Warning) {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::High
        };
        ConfidenceAssessment { level, issues }
    }
}

pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, inputs: &ConfidenceInputs) -> ConfidenceAssessment;
}

// ============================================================================
// DEFAULT SCORER
// ============================================================================

pub struct DefaultConfidenceScorer {
    /// Share of unclassified-channel rows above which the verdict is unreliable
    pub max_ambiguous_share: f64,

    /// Share of rows without ids above which we note it
    pub max_missing_id_share: f64,
}

impl DefaultConfidenceScorer {
    pub fn new() -> Self {
        DefaultConfidenceScorer {
            max_ambiguous_share: 0.25,
            max_missing_id_share: 0.5,
        }
    }
}

impl Default for DefaultConfidenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfidenceScorer for DefaultConfidenceScorer {
    fn score(&self, inputs: &ConfidenceInputs) -> ConfidenceAssessment {
        let mut issues = Vec::new();

        if inputs.rule_missing {
            issues.push(ConfidenceIssue {
                severity: Severity::Critical,
                issue: "No threshold rule covers this year".to_string(),
            });
        }

        if inputs.rule_estimated {
            issues.push(ConfidenceIssue {
                severity: Severity::Warning,
                issue: "Threshold figures are estimated".to_string(),
            });
        }

        let ambiguous = inputs.share(inputs.ambiguous_channel_count);
        if ambiguous > self.max_ambiguous_share {
            issues.push(ConfidenceIssue {
                severity: Severity::Critical,
                issue: format!("{:.0}% of sales have an unknown channel", ambiguous * 100.0),
            });
        } else if inputs.ambiguous_channel_count > 0 {
            issues.push(ConfidenceIssue {
                severity: Severity::Warning,
                issue: format!(
                    "{} sales have an unknown channel",
                    inputs.ambiguous_channel_count
                ),
            });
        }

        if inputs.repeated_row_count > 0 {
            issues.push(ConfidenceIssue {
                severity: Severity::Warning,
                issue: format!(
                    "{} sales without an id repeat an earlier row exactly",
                    inputs.repeated_row_count
                ),
            });
        }

        let missing_ids = inputs.share(inputs.missing_id_count);
        if missing_ids > self.max_missing_id_share {
            issues.push(ConfidenceIssue {
                severity: Severity::Info,
                issue: format!("{:.0}% of sales have no transaction id", missing_ids * 100.0),
            });
        }

        ConfidenceAssessment::from_issues(issues)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn complete() -> ConfidenceInputs {
        ConfidenceInputs {
            transaction_count: 100,
            ..ConfidenceInputs::default()
        }
    }

    #[test]
    fn test_complete_inputs_are_high() {
        let result = DefaultConfidenceScorer::new().score(&complete());
        assert_eq!(result.level, ConfidenceLevel::High);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_missing_rule_is_low() {
        let inputs = ConfidenceInputs {
            rule_missing: true,
            ..complete()
        };
        assert_eq!(DefaultConfidenceScorer::new().score(&inputs).level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_some_ambiguous_channels_is_medium() {
        let inputs = ConfidenceInputs {
            ambiguous_channel_count: 10,
            ..complete()
        };
        assert_eq!(DefaultConfidenceScorer::new().score(&inputs).level, ConfidenceLevel::Medium);

        let inputs = ConfidenceInputs {
            ambiguous_channel_count: 40,
            ..complete()
        };
        assert_eq!(DefaultConfidenceScorer::new().score(&inputs).level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_estimated_rule_is_medium() {
        let inputs = ConfidenceInputs {
            rule_estimated: true,
            ..complete()
        };
        assert_eq!(DefaultConfidenceScorer::new().score(&inputs).level, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_missing_ids_only_informational() {
        let inputs = ConfidenceInputs {
            missing_id_count: 100,
            ..complete()
        };
        let result = DefaultConfidenceScorer::new().score(&inputs);
        assert_eq!(result.level, ConfidenceLevel::High);
        assert_eq!(result.issues.len(), 1);
    }

    #[test]
    fn test_repeated_rows_are_medium() {
        let inputs = ConfidenceInputs {
            missing_id_count: 10,
            repeated_row_count: 2,
            ..complete()
        };
        let result = DefaultConfidenceScorer::new().score(&inputs);
        assert_eq!(result.level, ConfidenceLevel::Medium);
        assert!(result.issues.iter().any(|i| i.issue.contains("repeat")));
    }

    struct AlwaysLow;

    impl ConfidenceScorer for AlwaysLow {
        fn score(&self, _inputs: &ConfidenceInputs) -> ConfidenceAssessment {
            ConfidenceAssessment::from_issues(vec![ConfidenceIssue {
                severity: Severity::Critical,
                issue: "policy".to_string(),
            }])
        }
    }

    #[test]
    fn test_custom_scorer_plugs_in() {
        let scorer: Box<dyn ConfidenceScorer> = Box::new(AlwaysLow);
        assert_eq!(scorer.score(&complete()).level, ConfidenceLevel::Low);
    }
}
