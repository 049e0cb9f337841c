use crate::config::JudgeConfig;

/// Normalize output before comparison.
///
/// Applied to both expected and actual sides: trailing whitespace is
/// stripped per line, trailing blank lines are dropped, and the text is
/// case-folded when the judge is case-insensitive. The function is
/// idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(text: &str, config: &JudgeConfig) -> String {
    let mut lines: Vec<String> = text
        .split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if config.ignore_trailing_whitespace {
                line.trim_end().to_string()
            } else {
                line.to_string()
            }
        })
        .collect();

    if config.ignore_trailing_newlines {
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
    }

    let joined = lines.join("\n");

    if config.case_sensitive {
        joined
    } else {
        joined.to_lowercase()
    }
}
