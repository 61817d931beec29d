//! Judge module - boundary to the external execution sandbox
//!
//! This module owns everything that crosses the sandbox boundary:
//! - `TestInvocation`: one (code, language, stdin, expected output) tuple
//! - `JudgeStatus`: the sandbox's integer status codes as a closed enum
//! - `JudgeResult`: one per test case, consumed by the aggregator
//!
//! The judge module does NOT:
//! - Decide the overall verdict (that's the aggregator's job)
//! - Persist anything

pub mod judge0;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use judge0::Judge0Client;

/// One program execution requested from the sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct TestInvocation {
    pub language_id: u32,
    pub source_code: String,
    pub stdin: String,
    pub expected_output: String,
}

/// Opaque handle returned by the sandbox for a queued execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub String);

/// Runtime error flavours reported by the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeErrorKind {
    Sigsegv,
    Sigxfsz,
    Sigfpe,
    Sigabrt,
    Nzec,
    Other,
}

/// Sandbox status codes
///
/// Decoded from the wire id at the client boundary; nothing past the client
/// sees the raw integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeStatus {
    InQueue,
    Processing,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    RuntimeError(RuntimeErrorKind),
    InternalError,
    ExecFormatError,
}

impl JudgeStatus {
    /// Anything other than "in queue" or "processing"
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JudgeStatus::InQueue | JudgeStatus::Processing)
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, JudgeStatus::Accepted)
    }

    pub fn description(&self) -> &'static str {
        match self {
            JudgeStatus::InQueue => "In Queue",
            JudgeStatus::Processing => "Processing",
            JudgeStatus::Accepted => "Accepted",
            JudgeStatus::WrongAnswer => "Wrong Answer",
            JudgeStatus::TimeLimitExceeded => "Time Limit Exceeded",
            JudgeStatus::CompilationError => "Compilation Error",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Sigsegv) => "Runtime Error (SIGSEGV)",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Sigxfsz) => "Runtime Error (SIGXFSZ)",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Sigfpe) => "Runtime Error (SIGFPE)",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Sigabrt) => "Runtime Error (SIGABRT)",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Nzec) => "Runtime Error (NZEC)",
            JudgeStatus::RuntimeError(RuntimeErrorKind::Other) => "Runtime Error (Other)",
            JudgeStatus::InternalError => "Internal Error",
            JudgeStatus::ExecFormatError => "Exec Format Error",
        }
    }
}

impl TryFrom<u32> for JudgeStatus {
    type Error = JudgeError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        let status = match id {
            1 => JudgeStatus::InQueue,
            2 => JudgeStatus::Processing,
            3 => JudgeStatus::Accepted,
            4 => JudgeStatus::WrongAnswer,
            5 => JudgeStatus::TimeLimitExceeded,
            6 => JudgeStatus::CompilationError,
            7 => JudgeStatus::RuntimeError(RuntimeErrorKind::Sigsegv),
            8 => JudgeStatus::RuntimeError(RuntimeErrorKind::Sigxfsz),
            9 => JudgeStatus::RuntimeError(RuntimeErrorKind::Sigfpe),
            10 => JudgeStatus::RuntimeError(RuntimeErrorKind::Sigabrt),
            11 => JudgeStatus::RuntimeError(RuntimeErrorKind::Nzec),
            12 => JudgeStatus::RuntimeError(RuntimeErrorKind::Other),
            13 => JudgeStatus::InternalError,
            14 => JudgeStatus::ExecFormatError,
            other => {
                return Err(JudgeError::Malformed(format!(
                    "unknown status id {}",
                    other
                )))
            }
        };
        Ok(status)
    }
}

/// Outcome of a single test case execution
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeResult {
    pub status: JudgeStatus,
    /// CPU time in milliseconds
    pub time_ms: u64,
    /// Peak memory in KB
    pub memory_kb: u64,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub compile_output: Option<String>,
    /// Sandbox-side message (e.g. "Exited with error status 1")
    pub message: Option<String>,
}

impl JudgeResult {
    /// Most useful diagnostic text for a failed execution
    pub fn diagnostic(&self) -> Option<&str> {
        [&self.stderr, &self.compile_output, &self.message]
            .into_iter()
            .filter_map(|s| s.as_deref())
            .find(|s| !s.trim().is_empty())
    }
}

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("judge sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("malformed judge response: {0}")]
    Malformed(String),

    #[error("judge did not finish after {attempts} poll attempts")]
    Timeout { attempts: u32 },
}

impl From<reqwest::Error> for JudgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            JudgeError::Malformed(e.to_string())
        } else {
            JudgeError::Unavailable(e.to_string())
        }
    }
}

/// Client for the external execution sandbox
#[async_trait]
pub trait Judge: Send + Sync {
    /// Queue every invocation and return one token per invocation, in order
    async fn submit_batch(&self, cases: &[TestInvocation]) -> Result<Vec<Token>, JudgeError>;

    /// Poll until every token reaches a terminal status; results keep token order
    async fn poll_until_complete(&self, tokens: &[Token]) -> Result<Vec<JudgeResult>, JudgeError>;
}

/// Submit and wait for a whole batch
///
/// An empty batch never reaches the sandbox.
pub async fn execute_batch(
    judge: &dyn Judge,
    cases: &[TestInvocation],
) -> Result<Vec<JudgeResult>, JudgeError> {
    if cases.is_empty() {
        return Ok(Vec::new());
    }

    let tokens = judge.submit_batch(cases).await?;
    if tokens.len() != cases.len() {
        return Err(JudgeError::Malformed(format!(
            "expected {} tokens, got {}",
            cases.len(),
            tokens.len()
        )));
    }

    judge.poll_until_complete(&tokens).await
}
