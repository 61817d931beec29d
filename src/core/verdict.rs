use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a submission
///
/// `Pending` is the only non-terminal state. Every other variant is a final
/// verdict and is written at most once per submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError,
    InternalError,
    OtherError,
    /// The sandbox did not finish within the configured poll ceiling
    JudgeTimeout,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SubmissionStatus::Pending)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmissionStatus::Accepted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::WrongAnswer => "wrong_answer",
            SubmissionStatus::TimeLimitExceeded => "time_limit_exceeded",
            SubmissionStatus::CompilationError => "compilation_error",
            SubmissionStatus::RuntimeError => "runtime_error",
            SubmissionStatus::InternalError => "internal_error",
            SubmissionStatus::OtherError => "other_error",
            SubmissionStatus::JudgeTimeout => "judge_timeout",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => SubmissionStatus::Pending,
            "accepted" => SubmissionStatus::Accepted,
            "wrong_answer" => SubmissionStatus::WrongAnswer,
            "time_limit_exceeded" => SubmissionStatus::TimeLimitExceeded,
            "compilation_error" => SubmissionStatus::CompilationError,
            "runtime_error" => SubmissionStatus::RuntimeError,
            "internal_error" => SubmissionStatus::InternalError,
            "other_error" => SubmissionStatus::OtherError,
            "judge_timeout" => SubmissionStatus::JudgeTimeout,
            other => anyhow::bail!("Unknown submission status: {}", other),
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pending_is_non_terminal() {
        assert!(!SubmissionStatus::Pending.is_terminal());
        assert!(SubmissionStatus::WrongAnswer.is_terminal());
        assert!(SubmissionStatus::JudgeTimeout.is_terminal());
    }

    #[test]
    fn test_display_matches_serde() {
        for status in [
            SubmissionStatus::Accepted,
            SubmissionStatus::TimeLimitExceeded,
            SubmissionStatus::OtherError,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status));
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
        }
    }
}
