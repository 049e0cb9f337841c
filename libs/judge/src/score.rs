//! Per-case judgement and aggregate scoring.

use crate::compare::compare;
use crate::config::{ComparisonMode, JudgeConfig};
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};

/// Execution-level status of one test case, reported by the harness.
///
/// Anything other than `Success` overrides output comparison: the verdict
/// follows the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Success,
    TimedOut,
    MemoryExceeded,
    RuntimeError,
    Skipped,
}

/// Judgement of one test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseJudgement {
    pub test_id: String,
    pub verdict: Verdict,
    /// Points awarded: the case weight on AC (scaled by a special-judge
    /// score when present), 0 otherwise.
    pub score: f64,
    pub weight: f64,
}

/// Aggregate result over all cases of a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeSummary {
    pub verdict: Verdict,
    pub total_score: f64,
    pub max_score: f64,
    /// `total_score / max_score * 100`, 0 when there are no cases.
    pub score_percentage: f64,
    pub passed_cases: u32,
    pub total_cases: u32,
}

/// Judge a single test case from its execution status and captured output.
pub fn judge_case(
    test_id: &str,
    status: ExecStatus,
    expected: &str,
    actual: &str,
    config: &JudgeConfig,
) -> CaseJudgement {
    let weight = config.weight_of(test_id);

    let verdict = match status {
        ExecStatus::TimedOut => Verdict::TimeLimitExceeded,
        ExecStatus::MemoryExceeded => Verdict::MemoryLimitExceeded,
        ExecStatus::RuntimeError => Verdict::RuntimeError,
        ExecStatus::Skipped => Verdict::Skipped,
        ExecStatus::Success => {
            let outcome = compare(expected, actual, config);
            if outcome.matches {
                Verdict::Accepted
            } else if config.comparison_mode == ComparisonMode::Exact
                && outcome.whitespace_only_diff
            {
                Verdict::PresentationError
            } else {
                Verdict::WrongAnswer
            }
        }
    };

    CaseJudgement {
        test_id: test_id.to_string(),
        verdict,
        score: if verdict.is_accepted() { weight } else { 0.0 },
        weight,
    }
}

/// Judge a case decided by a special-judge checker.
pub fn judge_case_special(
    test_id: &str,
    status: ExecStatus,
    checker_passed: bool,
    checker_score: f64,
    config: &JudgeConfig,
) -> CaseJudgement {
    let weight = config.weight_of(test_id);

    let verdict = match status {
        ExecStatus::TimedOut => Verdict::TimeLimitExceeded,
        ExecStatus::MemoryExceeded => Verdict::MemoryLimitExceeded,
        ExecStatus::RuntimeError => Verdict::RuntimeError,
        ExecStatus::Skipped => Verdict::Skipped,
        ExecStatus::Success => {
            if checker_passed {
                Verdict::Accepted
            } else {
                Verdict::WrongAnswer
            }
        }
    };

    let score = if matches!(status, ExecStatus::Success) {
        checker_score.clamp(0.0, 1.0) * weight
    } else {
        0.0
    };

    CaseJudgement {
        test_id: test_id.to_string(),
        verdict,
        score,
        weight,
    }
}

/// Aggregate per-case judgements into the submission verdict and score.
///
/// The final verdict is the highest-priority verdict present
/// (`CE → TLE → MLE → RE → WA → AC`); compile errors never reach this
/// function because compilation failure short-circuits before any case
/// runs.
pub fn aggregate(cases: &[CaseJudgement], config: &JudgeConfig) -> JudgeSummary {
    if cases.is_empty() {
        return JudgeSummary {
            verdict: Verdict::Accepted,
            total_score: 0.0,
            max_score: 0.0,
            score_percentage: 0.0,
            passed_cases: 0,
            total_cases: 0,
        };
    }

    let max_score: f64 = cases.iter().map(|c| c.weight).sum();
    let passed_cases = cases.iter().filter(|c| c.verdict.is_accepted()).count() as u32;
    let all_passed = passed_cases as usize == cases.len();

    let total_score: f64 = if config.partial_scoring {
        cases.iter().map(|c| c.score).sum()
    } else if all_passed {
        max_score
    } else {
        0.0
    };

    let verdict = cases
        .iter()
        .map(|c| c.verdict)
        .min_by_key(|v| v.priority())
        .unwrap_or(Verdict::Accepted);

    let score_percentage = if max_score > 0.0 {
        total_score / max_score * 100.0
    } else {
        0.0
    };

    JudgeSummary {
        verdict,
        total_score,
        max_score,
        score_percentage,
        passed_cases,
        total_cases: cases.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JudgeConfig {
        JudgeConfig::default()
    }

    #[test]
    fn test_accepted_case_scores_weight() {
        let case = judge_case("t1", ExecStatus::Success, "5\n", "5\n", &config());
        assert_eq!(case.verdict, Verdict::Accepted);
        assert_eq!(case.score, 1.0);
    }

    #[test]
    fn test_wrong_answer_scores_zero() {
        let case = judge_case("t1", ExecStatus::Success, "5", "6", &config());
        assert_eq!(case.verdict, Verdict::WrongAnswer);
        assert_eq!(case.score, 0.0);
    }

    #[test]
    fn test_status_overrides_comparison() {
        // Output matches, but the run timed out: TLE wins
        let case = judge_case("t1", ExecStatus::TimedOut, "5", "5", &config());
        assert_eq!(case.verdict, Verdict::TimeLimitExceeded);
        assert_eq!(case.score, 0.0);

        let case = judge_case("t1", ExecStatus::MemoryExceeded, "5", "5", &config());
        assert_eq!(case.verdict, Verdict::MemoryLimitExceeded);

        let case = judge_case("t1", ExecStatus::RuntimeError, "5", "5", &config());
        assert_eq!(case.verdict, Verdict::RuntimeError);
    }

    #[test]
    fn test_layout_mismatch_is_presentation_error() {
        let case = judge_case("t1", ExecStatus::Success, "1 2 3", "1  2\n3", &config());
        assert_eq!(case.verdict, Verdict::PresentationError);
    }

    #[test]
    fn test_weighted_case() {
        let mut cfg = config();
        cfg.test_weights.insert("t1".to_string(), 3.0);

        let case = judge_case("t1", ExecStatus::Success, "ok", "ok", &cfg);
        assert_eq!(case.score, 3.0);
        assert_eq!(case.weight, 3.0);
    }

    #[test]
    fn test_special_case_scales_weight_by_checker_score() {
        let mut cfg = config();
        cfg.test_weights.insert("t1".to_string(), 2.0);

        let case = judge_case_special("t1", ExecStatus::Success, true, 0.5, &cfg);
        assert_eq!(case.verdict, Verdict::Accepted);
        assert_eq!(case.score, 1.0);
    }

    #[test]
    fn test_aggregate_all_accepted() {
        let cfg = config();
        let cases = vec![
            judge_case("t1", ExecStatus::Success, "1", "1", &cfg),
            judge_case("t2", ExecStatus::Success, "2", "2", &cfg),
        ];

        let summary = aggregate(&cases, &cfg);
        assert_eq!(summary.verdict, Verdict::Accepted);
        assert_eq!(summary.score_percentage, 100.0);
        assert_eq!(summary.passed_cases, 2);
        assert_eq!(summary.total_cases, 2);
    }

    #[test]
    fn test_aggregate_verdict_priority() {
        let cfg = config();
        let cases = vec![
            judge_case("t1", ExecStatus::Success, "1", "9", &cfg), // WA
            judge_case("t2", ExecStatus::TimedOut, "2", "2", &cfg), // TLE
            judge_case("t3", ExecStatus::Success, "3", "3", &cfg), // AC
        ];

        // TLE outranks WA and AC
        let summary = aggregate(&cases, &cfg);
        assert_eq!(summary.verdict, Verdict::TimeLimitExceeded);
        assert_eq!(summary.passed_cases, 1);
    }

    #[test]
    fn test_aggregate_partial_scoring() {
        let cfg = config();
        let cases = vec![
            judge_case("t1", ExecStatus::Success, "1", "1", &cfg),
            judge_case("t2", ExecStatus::Success, "2", "9", &cfg),
        ];

        let summary = aggregate(&cases, &cfg);
        assert_eq!(summary.total_score, 1.0);
        assert_eq!(summary.score_percentage, 50.0);
    }

    #[test]
    fn test_aggregate_all_or_nothing() {
        let cfg = JudgeConfig {
            partial_scoring: false,
            ..Default::default()
        };
        let cases = vec![
            judge_case("t1", ExecStatus::Success, "1", "1", &cfg),
            judge_case("t2", ExecStatus::Success, "2", "9", &cfg),
        ];

        let summary = aggregate(&cases, &cfg);
        assert_eq!(summary.total_score, 0.0);
        assert_eq!(summary.score_percentage, 0.0);
    }

    #[test]
    fn test_aggregate_empty() {
        let summary = aggregate(&[], &config());
        assert_eq!(summary.total_cases, 0);
        assert_eq!(summary.score_percentage, 0.0);
    }

    #[test]
    fn test_judging_is_idempotent() {
        let cfg = config();
        let a = judge_case("t1", ExecStatus::Success, "x y", "x y", &cfg);
        let b = judge_case("t1", ExecStatus::Success, "x y", "x y", &cfg);
        assert_eq!(a.verdict, b.verdict);
        assert_eq!(a.score, b.score);
    }
}
