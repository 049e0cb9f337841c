use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Final judgement of a submission or a single test case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    InternalError,
    PresentationError,
    Skipped,
}

impl Verdict {
    /// Short code used in APIs and metrics labels.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Accepted => "AC",
            Self::WrongAnswer => "WA",
            Self::TimeLimitExceeded => "TLE",
            Self::MemoryLimitExceeded => "MLE",
            Self::RuntimeError => "RE",
            Self::CompilationError => "CE",
            Self::InternalError => "IE",
            Self::PresentationError => "PE",
            Self::Skipped => "SK",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Selection priority when aggregating per-case verdicts; lower wins.
    pub fn priority(&self) -> u8 {
        match self {
            Self::CompilationError => 0,
            Self::InternalError => 1,
            Self::TimeLimitExceeded => 2,
            Self::MemoryLimitExceeded => 3,
            Self::RuntimeError => 4,
            Self::WrongAnswer => 5,
            Self::PresentationError => 6,
            Self::Skipped => 7,
            Self::Accepted => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(Verdict::Accepted.code(), "AC");
        assert_eq!(Verdict::WrongAnswer.code(), "WA");
        assert_eq!(Verdict::TimeLimitExceeded.code(), "TLE");
        assert_eq!(Verdict::MemoryLimitExceeded.code(), "MLE");
        assert_eq!(Verdict::RuntimeError.code(), "RE");
        assert_eq!(Verdict::CompilationError.code(), "CE");
        assert_eq!(Verdict::InternalError.code(), "IE");
        assert_eq!(Verdict::PresentationError.code(), "PE");
        assert_eq!(Verdict::Skipped.code(), "SK");
    }

    #[test]
    fn test_priority_ordering() {
        // CE → TLE → MLE → RE → WA → AC
        assert!(Verdict::CompilationError.priority() < Verdict::TimeLimitExceeded.priority());
        assert!(Verdict::TimeLimitExceeded.priority() < Verdict::MemoryLimitExceeded.priority());
        assert!(Verdict::MemoryLimitExceeded.priority() < Verdict::RuntimeError.priority());
        assert!(Verdict::RuntimeError.priority() < Verdict::WrongAnswer.priority());
        assert!(Verdict::WrongAnswer.priority() < Verdict::Accepted.priority());
    }

    #[test]
    fn test_serde_round_trip() {
        let json = serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"TIME_LIMIT_EXCEEDED\"");
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Verdict::TimeLimitExceeded);
    }
}
