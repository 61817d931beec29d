//! Verdict aggregation
//!
//! Turns the ordered per-case judge results into one overall verdict.
//!
//! For `submit` the walk stops at the first non-accepted case: runtime is the
//! sum over accepted cases, memory the peak. Hidden cases never disclose their
//! input or outputs, even when they are the failing case.
//!
//! For `run` every case is reported and both time and memory are peaks.

use serde::{Deserialize, Serialize};

use crate::core::SubmissionStatus;
use crate::judge::{JudgeResult, JudgeStatus};
use crate::problem::{Problem, TestCase};

/// Per-case record returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseDetail {
    pub index: usize,
    pub hidden: bool,
    pub status: SubmissionStatus,
    pub time_ms: u64,
    pub memory_kb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Overall outcome of grading one submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: SubmissionStatus,
    pub passed: usize,
    pub total: usize,
    pub runtime_ms: u64,
    pub memory_kb: u64,
    pub error_message: String,
    pub details: Vec<TestCaseDetail>,
}

impl Verdict {
    /// Verdict for a batch the sandbox never finished
    pub fn judge_timeout(problem: &Problem, attempts: u32) -> Self {
        Self {
            status: SubmissionStatus::JudgeTimeout,
            passed: 0,
            total: problem.total_count(),
            runtime_ms: 0,
            memory_kb: 0,
            error_message: format!("Judge did not finish after {} poll attempts", attempts),
            details: Vec::new(),
        }
    }
}

/// Translate a terminal sandbox status into the submission taxonomy
pub fn status_of(status: JudgeStatus) -> SubmissionStatus {
    match status {
        JudgeStatus::Accepted => SubmissionStatus::Accepted,
        JudgeStatus::WrongAnswer => SubmissionStatus::WrongAnswer,
        JudgeStatus::TimeLimitExceeded => SubmissionStatus::TimeLimitExceeded,
        JudgeStatus::CompilationError => SubmissionStatus::CompilationError,
        JudgeStatus::RuntimeError(_) => SubmissionStatus::RuntimeError,
        JudgeStatus::InternalError => SubmissionStatus::InternalError,
        // Non-terminal statuses never reach the aggregator
        JudgeStatus::ExecFormatError | JudgeStatus::InQueue | JudgeStatus::Processing => {
            SubmissionStatus::OtherError
        }
    }
}

/// Aggregate results for `submit`
///
/// `results` must be in judged order: visible cases, then hidden ones.
pub fn aggregate(problem: &Problem, results: &[JudgeResult]) -> Verdict {
    let visible_count = problem.visible_count();
    let cases: Vec<&TestCase> = problem.judged_cases().collect();

    let mut verdict = Verdict {
        status: SubmissionStatus::Accepted,
        passed: 0,
        total: problem.total_count(),
        runtime_ms: 0,
        memory_kb: 0,
        error_message: String::new(),
        details: Vec::new(),
    };

    for (index, result) in results.iter().enumerate() {
        let hidden = index >= visible_count;
        let status = status_of(result.status);
        let accepted = result.status.is_accepted();

        if accepted {
            verdict.passed += 1;
            verdict.runtime_ms += result.time_ms;
            verdict.memory_kb = verdict.memory_kb.max(result.memory_kb);
        }

        // Visible cases always, plus the failing one
        if !hidden || !accepted {
            let case = cases.get(index).copied();
            let error_message = result.diagnostic().map(str::to_string);
            let detail = if hidden {
                TestCaseDetail {
                    index,
                    hidden,
                    status,
                    time_ms: result.time_ms,
                    memory_kb: result.memory_kb,
                    input: None,
                    expected_output: None,
                    actual_output: None,
                    error_message,
                }
            } else {
                TestCaseDetail {
                    index,
                    hidden,
                    status,
                    time_ms: result.time_ms,
                    memory_kb: result.memory_kb,
                    input: case.map(|c| c.input.clone()),
                    expected_output: case.map(|c| c.output.clone()),
                    actual_output: result.stdout.clone(),
                    error_message,
                }
            };
            verdict.details.push(detail);
        }

        if !accepted {
            verdict.status = status;
            verdict.error_message = result
                .diagnostic()
                .unwrap_or_else(|| result.status.description())
                .to_string();
            break;
        }
    }

    verdict
}

/// Origin of a case evaluated by `run`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSource {
    Default,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCaseResult {
    pub index: usize,
    pub source: CaseSource,
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub status: SubmissionStatus,
    pub passed: bool,
    pub time_ms: u64,
    pub memory_kb: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub all_passed: bool,
    pub passed: usize,
    pub total: usize,
    pub default_cases: usize,
    pub custom_cases: usize,
    pub max_time_ms: u64,
    pub max_memory_kb: u64,
    pub cases: Vec<RunCaseResult>,
}

/// Summarize a `run`: `default_count` visible cases followed by custom ones
pub fn summarize_run(
    cases: &[TestCase],
    default_count: usize,
    results: &[JudgeResult],
) -> RunSummary {
    let cases: Vec<RunCaseResult> = cases
        .iter()
        .zip(results)
        .enumerate()
        .map(|(index, (case, result))| RunCaseResult {
            index,
            source: if index < default_count {
                CaseSource::Default
            } else {
                CaseSource::Custom
            },
            input: case.input.clone(),
            expected_output: case.output.clone(),
            actual_output: result.stdout.clone().unwrap_or_default(),
            status: status_of(result.status),
            passed: result.status.is_accepted(),
            time_ms: result.time_ms,
            memory_kb: result.memory_kb,
            error_message: result.diagnostic().map(str::to_string),
        })
        .collect();

    let passed = cases.iter().filter(|c| c.passed).count();
    RunSummary {
        all_passed: passed == cases.len(),
        passed,
        total: cases.len(),
        default_cases: default_count.min(cases.len()),
        custom_cases: cases.len().saturating_sub(default_count),
        max_time_ms: cases.iter().map(|c| c.time_ms).max().unwrap_or(0),
        max_memory_kb: cases.iter().map(|c| c.memory_kb).max().unwrap_or(0),
        cases,
    }
}
