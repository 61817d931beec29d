use thiserror::Error;

use crate::judge::JudgeError;

/// Errors returned by `submit` and `run`
///
/// Non-accepted verdicts are not errors; they come back as normal results.
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("premium subscription required for this problem")]
    PremiumRequired,

    #[error("compilation failed: {diagnostic}")]
    Compile { diagnostic: String },

    #[error("{0}")]
    JudgeUnavailable(String),

    #[error("judge did not finish after {attempts} poll attempts")]
    JudgeTimeout { attempts: u32 },

    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),
}

impl GradeError {
    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Validation(_) => "VALIDATION_ERROR",
            GradeError::NotFound(_) => "NOT_FOUND",
            GradeError::PremiumRequired => "PREMIUM_REQUIRED",
            GradeError::Compile { .. } => "COMPILATION_ERROR",
            GradeError::JudgeUnavailable(_) => "JUDGE_UNAVAILABLE",
            GradeError::JudgeTimeout { .. } => "JUDGE_TIMEOUT",
            GradeError::Persistence(_) => "PERSISTENCE_ERROR",
        }
    }

    /// Whether repeating the whole operation may succeed
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GradeError::JudgeUnavailable(_)
                | GradeError::JudgeTimeout { .. }
                | GradeError::Persistence(_)
        )
    }
}

impl From<JudgeError> for GradeError {
    fn from(e: JudgeError) -> Self {
        match e {
            JudgeError::Timeout { attempts } => GradeError::JudgeTimeout { attempts },
            other => GradeError::JudgeUnavailable(other.to_string()),
        }
    }
}
