//! The runner protocol between the in-sandbox runner and the harness.
//!
//! The runner writes any number of log lines to stdout followed by exactly
//! one line of the form `__RESULT__{json}`. When the sentinel line is
//! absent the harness falls back to raw stdout plus the container exit
//! code; a sentinel line with an unparseable payload is a protocol
//! violation and judged as an internal error.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};

/// Sentinel prefix of the result line.
pub const RESULT_PREFIX: &str = "__RESULT__";

/// Per-stream cap for output persisted in the result payload.
pub const OUTPUT_CAP_PAYLOAD: usize = 16 * 1024;

/// Per-stream cap at the raw log level.
pub const OUTPUT_CAP_RAW: usize = 1024 * 1024;

/// Marker appended to truncated output.
pub const TRUNCATION_MARKER: &str = "… (truncated)";

/// Structured result emitted by the in-sandbox runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunnerReport {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(default)]
    pub execution_time_ms: Option<u64>,
    #[serde(default)]
    pub memory_used_kb: Option<u64>,
}

/// Extract the runner report from captured stdout.
///
/// Returns `Ok(None)` when no sentinel line exists (legacy fallback), the
/// parsed report when the last sentinel line carries valid JSON, and a
/// protocol error otherwise.
pub fn parse_runner_output(stdout: &str) -> Result<Option<RunnerReport>, SandboxError> {
    let Some(line) = stdout
        .lines()
        .rev()
        .find(|line| line.starts_with(RESULT_PREFIX))
    else {
        return Ok(None);
    };

    let payload = &line[RESULT_PREFIX.len()..];
    serde_json::from_str(payload)
        .map(Some)
        .map_err(|e| SandboxError::Protocol(format!("bad result payload: {}", e)))
}

/// Truncate to `max_bytes` on a char boundary, appending the marker when
/// anything was cut.
pub fn truncate_with_marker(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut cut = max_bytes;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }

    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_result_line() {
        let stdout = "compiling...\nrunning...\n__RESULT__{\"success\":true,\"output\":\"42\",\"exitCode\":0,\"executionTimeMs\":12}\n";

        let report = parse_runner_output(stdout).unwrap().unwrap();
        assert!(report.success);
        assert_eq!(report.output, "42");
        assert_eq!(report.exit_code, Some(0));
        assert_eq!(report.execution_time_ms, Some(12));
    }

    #[test]
    fn test_absent_sentinel_falls_back() {
        let report = parse_runner_output("plain output\n").unwrap();
        assert!(report.is_none());
    }

    #[test]
    fn test_last_sentinel_wins() {
        let stdout = "__RESULT__{\"success\":false}\n__RESULT__{\"success\":true}\n";
        let report = parse_runner_output(stdout).unwrap().unwrap();
        assert!(report.success);
    }

    #[test]
    fn test_bad_payload_is_protocol_violation() {
        let err = parse_runner_output("__RESULT__{not json}").unwrap_err();
        assert!(matches!(err, SandboxError::Protocol(_)));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_with_marker("hello", 16), "hello");
    }

    #[test]
    fn test_truncate_appends_marker() {
        let long = "x".repeat(100);
        let truncated = truncate_with_marker(&long, 10);
        assert!(truncated.starts_with("xxxxxxxxxx"));
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // 'é' is two bytes; cutting at byte 1 would split it
        let text = "éé";
        let truncated = truncate_with_marker(text, 1);
        assert!(truncated.starts_with(TRUNCATION_MARKER) || !truncated.contains('\u{FFFD}'));
    }

    #[test]
    fn test_report_defaults() {
        let report: RunnerReport = serde_json::from_str(r#"{"success":false}"#).unwrap();
        assert!(!report.success);
        assert_eq!(report.output, "");
        assert!(report.error.is_none());
        assert!(report.memory_used_kb.is_none());
    }
}
