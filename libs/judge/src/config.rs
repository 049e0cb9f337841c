use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// How expected and actual output are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Normalized byte equality.
    #[default]
    Exact,
    /// Whitespace-split token equality.
    Token,
    /// Numeric comparison with absolute-or-relative tolerance.
    Float,
    /// External checker process decides.
    Special,
}

/// Judge configuration for one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub comparison_mode: ComparisonMode,

    /// Tolerance for `Float` mode; a pair matches when
    /// `|e - a| <= tol` or `|e - a| <= tol * |e|`.
    pub float_tolerance: f64,

    pub case_sensitive: bool,

    pub ignore_trailing_whitespace: bool,

    pub ignore_trailing_newlines: bool,

    /// Per-test weights by test id; missing ids weigh 1.0.
    pub test_weights: HashMap<String, f64>,

    /// With partial scoring each passed case contributes its weight;
    /// without it the score is all-or-nothing.
    pub partial_scoring: bool,

    /// Checker binary for `Special` mode.
    pub special_judge_path: Option<PathBuf>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            comparison_mode: ComparisonMode::Exact,
            float_tolerance: 1e-6,
            case_sensitive: true,
            ignore_trailing_whitespace: true,
            ignore_trailing_newlines: true,
            test_weights: HashMap::new(),
            partial_scoring: true,
            special_judge_path: None,
        }
    }
}

impl JudgeConfig {
    /// Weight of a test case, defaulting to 1.0 for unknown ids.
    pub fn weight_of(&self, test_id: &str) -> f64 {
        self.test_weights.get(test_id).copied().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JudgeConfig::default();
        assert_eq!(config.comparison_mode, ComparisonMode::Exact);
        assert_eq!(config.float_tolerance, 1e-6);
        assert!(config.case_sensitive);
        assert!(config.ignore_trailing_whitespace);
        assert!(config.ignore_trailing_newlines);
        assert!(config.partial_scoring);
        assert!(config.special_judge_path.is_none());
    }

    #[test]
    fn test_weight_defaults_to_one() {
        let mut config = JudgeConfig::default();
        config.test_weights.insert("t1".to_string(), 2.5);

        assert_eq!(config.weight_of("t1"), 2.5);
        assert_eq!(config.weight_of("t2"), 1.0);
    }

    #[test]
    fn test_deserializes_with_partial_fields() {
        let config: JudgeConfig =
            serde_json::from_str(r#"{"comparison_mode":"float","float_tolerance":1e-5}"#).unwrap();
        assert_eq!(config.comparison_mode, ComparisonMode::Float);
        assert_eq!(config.float_tolerance, 1e-5);
        // Everything else keeps its default
        assert!(config.partial_scoring);
    }
}
