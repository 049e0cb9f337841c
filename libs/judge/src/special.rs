//! External checker ("special judge") invocation.
//!
//! The checker is called as
//! `checker <input_path> <expected_path> <actual_path> <test_id>` with a
//! 30 second timeout. Its stdout is parsed in order of preference:
//!
//! 1. A JSON document `{"verdict": ..., "passed": ..., "score": ..., "message": ...}`
//! 2. A bareword: `AC`, `WA`, `1`, `0`, `true`, `false`
//! 3. A lone float, taken as the score in `[0, 1]`

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Wall-clock cap on one checker invocation.
const CHECKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SpecialJudgeError {
    #[error("checker binary not configured")]
    NotConfigured,

    #[error("checker failed to start: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("checker timed out after {0:?}")]
    Timeout(Duration),

    #[error("checker output unparseable: {0:?}")]
    Unparseable(String),
}

/// Paths handed to the checker.
#[derive(Debug, Clone)]
pub struct CheckerInput {
    pub input_path: PathBuf,
    pub expected_path: PathBuf,
    pub actual_path: PathBuf,
    pub test_id: String,
}

/// Parsed checker decision.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerResult {
    pub passed: bool,
    /// Score multiplier in `[0, 1]`.
    pub score: f64,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CheckerJson {
    verdict: Option<String>,
    passed: Option<bool>,
    score: Option<f64>,
    message: Option<String>,
}

/// Run the checker and parse its decision.
pub async fn run_special_judge(
    checker: &Path,
    input: &CheckerInput,
) -> Result<CheckerResult, SpecialJudgeError> {
    let child = Command::new(checker)
        .arg(&input.input_path)
        .arg(&input.expected_path)
        .arg(&input.actual_path)
        .arg(&input.test_id)
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(CHECKER_TIMEOUT, child)
        .await
        .map_err(|_| SpecialJudgeError::Timeout(CHECKER_TIMEOUT))??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    debug!(test_id = %input.test_id, stdout = %stdout.trim(), "Checker finished");

    parse_checker_output(stdout.trim())
}

/// Stage one case's data on disk and run the checker over it.
///
/// The checker contract is path-based, so the in-memory case data is
/// written to a throwaway directory that lives only for the invocation.
pub async fn check_case(
    checker: &Path,
    test_id: &str,
    input: &str,
    expected: &str,
    actual: &str,
) -> Result<CheckerResult, SpecialJudgeError> {
    let dir = tempfile::tempdir()?;

    let input_path = dir.path().join("input.txt");
    let expected_path = dir.path().join("expected.txt");
    let actual_path = dir.path().join("actual.txt");

    std::fs::write(&input_path, input)?;
    std::fs::write(&expected_path, expected)?;
    std::fs::write(&actual_path, actual)?;

    run_special_judge(
        checker,
        &CheckerInput {
            input_path,
            expected_path,
            actual_path,
            test_id: test_id.to_string(),
        },
    )
    .await
}

/// Parse checker stdout through the fallback chain.
pub fn parse_checker_output(stdout: &str) -> Result<CheckerResult, SpecialJudgeError> {
    // 1. Structured JSON
    if let Ok(json) = serde_json::from_str::<CheckerJson>(stdout) {
        let passed = match (json.passed, json.verdict.as_deref()) {
            (Some(passed), _) => passed,
            (None, Some(verdict)) => matches!(verdict, "AC" | "OK" | "ACCEPTED"),
            (None, None) => json.score.is_some_and(|s| s > 0.0),
        };
        let score = json.score.unwrap_or(if passed { 1.0 } else { 0.0 });
        return Ok(CheckerResult {
            passed,
            score: score.clamp(0.0, 1.0),
            message: json.message,
        });
    }

    // 2. Barewords
    match stdout {
        "AC" | "1" | "true" => {
            return Ok(CheckerResult {
                passed: true,
                score: 1.0,
                message: None,
            })
        }
        "WA" | "0" | "false" => {
            return Ok(CheckerResult {
                passed: false,
                score: 0.0,
                message: None,
            })
        }
        _ => {}
    }

    // 3. A lone float score
    if let Ok(score) = stdout.parse::<f64>() {
        let score = score.clamp(0.0, 1.0);
        return Ok(CheckerResult {
            passed: score > 0.0,
            score,
            message: None,
        });
    }

    Err(SpecialJudgeError::Unparseable(stdout.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_with_passed_flag() {
        let result =
            parse_checker_output(r#"{"passed": true, "score": 0.5, "message": "half"}"#).unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 0.5);
        assert_eq!(result.message.as_deref(), Some("half"));
    }

    #[test]
    fn test_parse_json_with_verdict_only() {
        let result = parse_checker_output(r#"{"verdict": "AC"}"#).unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 1.0);

        let result = parse_checker_output(r#"{"verdict": "WA"}"#).unwrap();
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_parse_barewords() {
        assert!(parse_checker_output("AC").unwrap().passed);
        assert!(parse_checker_output("true").unwrap().passed);
        assert!(!parse_checker_output("WA").unwrap().passed);
        assert!(!parse_checker_output("false").unwrap().passed);
    }

    #[test]
    fn test_bareword_binary_digits() {
        // "1" and "0" take the bareword path, not the float path
        let one = parse_checker_output("1").unwrap();
        assert!(one.passed);
        assert_eq!(one.score, 1.0);

        let zero = parse_checker_output("0").unwrap();
        assert!(!zero.passed);
        assert_eq!(zero.score, 0.0);
    }

    #[test]
    fn test_parse_lone_float_score() {
        let result = parse_checker_output("0.75").unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 0.75);
    }

    #[test]
    fn test_score_clamped() {
        assert_eq!(parse_checker_output("3.5").unwrap().score, 1.0);
        assert_eq!(parse_checker_output("-1").unwrap().score, 0.0);
    }

    #[test]
    fn test_garbage_is_unparseable() {
        let err = parse_checker_output("segfault near line 3").unwrap_err();
        assert!(matches!(err, SpecialJudgeError::Unparseable(_)));
    }

    #[tokio::test]
    async fn test_checker_subprocess_round_trip() {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let checker = dir.path().join("checker.sh");
        {
            let mut f = std::fs::File::create(&checker).unwrap();
            writeln!(f, "#!/bin/sh").unwrap();
            writeln!(f, "echo AC").unwrap();
        }
        std::fs::set_permissions(&checker, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = CheckerInput {
            input_path: dir.path().join("in.txt"),
            expected_path: dir.path().join("exp.txt"),
            actual_path: dir.path().join("act.txt"),
            test_id: "t1".to_string(),
        };

        let result = run_special_judge(&checker, &input).await.unwrap();
        assert!(result.passed);
    }
}
