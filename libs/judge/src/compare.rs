use crate::config::{ComparisonMode, JudgeConfig};
use crate::normalize::normalize;

/// First mismatching token, for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenDiff {
    /// Zero-based token position.
    pub position: usize,
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// Result of comparing expected against actual output.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareOutcome {
    pub matches: bool,
    /// Set in token and float modes when a specific token differs.
    pub first_diff: Option<TokenDiff>,
    /// In exact mode: the outputs differ only in whitespace layout
    /// (token-wise equal). Maps to a presentation error.
    pub whitespace_only_diff: bool,
}

impl CompareOutcome {
    fn matched() -> Self {
        Self {
            matches: true,
            first_diff: None,
            whitespace_only_diff: false,
        }
    }
}

/// Compare expected and actual output under the configured mode.
///
/// `Special` mode is decided by an external checker and is not handled
/// here; callers must route it through [`crate::run_special_judge`].
pub fn compare(expected: &str, actual: &str, config: &JudgeConfig) -> CompareOutcome {
    match config.comparison_mode {
        ComparisonMode::Exact => compare_exact(expected, actual, config),
        ComparisonMode::Token => compare_tokens(expected, actual, config),
        ComparisonMode::Float => compare_floats(expected, actual, config),
        ComparisonMode::Special => CompareOutcome {
            matches: false,
            first_diff: None,
            whitespace_only_diff: false,
        },
    }
}

fn compare_exact(expected: &str, actual: &str, config: &JudgeConfig) -> CompareOutcome {
    let expected_norm = normalize(expected, config);
    let actual_norm = normalize(actual, config);

    if expected_norm == actual_norm {
        return CompareOutcome::matched();
    }

    // Distinguish wrong content from wrong layout
    let token_result = compare_tokens(expected, actual, config);
    CompareOutcome {
        matches: false,
        first_diff: token_result.first_diff,
        whitespace_only_diff: token_result.matches,
    }
}

fn compare_tokens(expected: &str, actual: &str, config: &JudgeConfig) -> CompareOutcome {
    let expected_norm = normalize(expected, config);
    let actual_norm = normalize(actual, config);

    let expected_tokens: Vec<&str> = expected_norm.split_whitespace().collect();
    let actual_tokens: Vec<&str> = actual_norm.split_whitespace().collect();

    let max_len = expected_tokens.len().max(actual_tokens.len());
    for position in 0..max_len {
        let e = expected_tokens.get(position);
        let a = actual_tokens.get(position);
        if e != a {
            return CompareOutcome {
                matches: false,
                first_diff: Some(TokenDiff {
                    position,
                    expected: e.map(|s| s.to_string()),
                    actual: a.map(|s| s.to_string()),
                }),
                whitespace_only_diff: false,
            };
        }
    }

    CompareOutcome::matched()
}

fn compare_floats(expected: &str, actual: &str, config: &JudgeConfig) -> CompareOutcome {
    let expected_norm = normalize(expected, config);
    let actual_norm = normalize(actual, config);

    let expected_tokens: Vec<&str> = expected_norm.split_whitespace().collect();
    let actual_tokens: Vec<&str> = actual_norm.split_whitespace().collect();

    let max_len = expected_tokens.len().max(actual_tokens.len());
    for position in 0..max_len {
        let (Some(e), Some(a)) = (
            expected_tokens.get(position),
            actual_tokens.get(position),
        ) else {
            return diff_at(position, &expected_tokens, &actual_tokens);
        };

        let matched = match (e.parse::<f64>(), a.parse::<f64>()) {
            (Ok(ev), Ok(av)) => floats_match(ev, av, config.float_tolerance),
            // Non-numeric tokens fall back to literal equality
            _ => e == a,
        };

        if !matched {
            return diff_at(position, &expected_tokens, &actual_tokens);
        }
    }

    CompareOutcome::matched()
}

/// Absolute-or-relative tolerance; NaNs are equal, infinities only with
/// matching sign.
fn floats_match(expected: f64, actual: f64, tolerance: f64) -> bool {
    if expected.is_nan() && actual.is_nan() {
        return true;
    }
    if expected.is_infinite() || actual.is_infinite() {
        return expected == actual;
    }

    let diff = (expected - actual).abs();
    diff <= tolerance || diff <= tolerance * expected.abs()
}

fn diff_at(position: usize, expected: &[&str], actual: &[&str]) -> CompareOutcome {
    CompareOutcome {
        matches: false,
        first_diff: Some(TokenDiff {
            position,
            expected: expected.get(position).map(|s| s.to_string()),
            actual: actual.get(position).map(|s| s.to_string()),
        }),
        whitespace_only_diff: false,
    }
}
