//! Grading pipeline
//!
//! `submit`: validate → load problem → local compile gate → create pending
//! submission → judge visible+hidden cases → aggregate → finalize →
//! post-acceptance update.
//!
//! `run`: validate → load problem → local compile gate → judge visible and
//! custom cases → summarize. Nothing is persisted.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::aggregator::{self, RunSummary, Verdict};
use crate::compiler::{CompileCheck, CompileGate};
use crate::config::GradeLimits;
use crate::error::GradeError;
use crate::judge::{self, Judge, JudgeError, TestInvocation};
use crate::languages::{self, Language, LanguageConfig};
use crate::problem::{Difficulty, Problem, ProblemStore, TestCase};
use crate::progress::{ProgressStore, ProgressUpdater, UpdateSummary};
use crate::submission::{LifecycleManager, NewSubmission, SubmissionNotes, SubmissionStore};

/// Authenticated caller, as resolved by the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub user_id: String,
    #[serde(default)]
    pub is_premium: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub caller: Caller,
    pub problem_id: String,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub notes: Option<SubmissionNotes>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub caller: Caller,
    pub problem_id: String,
    pub code: String,
    pub language: String,
    #[serde(default)]
    pub custom_test_cases: Vec<TestCase>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemSummary {
    pub id: String,
    pub title: String,
    pub difficulty: Difficulty,
}

impl From<&Problem> for ProblemSummary {
    fn from(problem: &Problem) -> Self {
        Self {
            id: problem.id.clone(),
            title: problem.title.clone(),
            difficulty: problem.difficulty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submission_id: i64,
    pub problem: ProblemSummary,
    pub language: Language,
    #[serde(flatten)]
    pub verdict: Verdict,
    pub visible_count: usize,
    pub hidden_count: usize,
    /// Set only when this submission was accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<UpdateSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub problem: ProblemSummary,
    pub language: Language,
    #[serde(flatten)]
    pub summary: RunSummary,
}

pub struct Grader {
    judge: Arc<dyn Judge>,
    gate: CompileGate,
    problems: Arc<dyn ProblemStore>,
    lifecycle: LifecycleManager,
    progress: ProgressUpdater,
    limits: GradeLimits,
}

impl Grader {
    pub fn new(
        judge: Arc<dyn Judge>,
        gate: CompileGate,
        problems: Arc<dyn ProblemStore>,
        submissions: Arc<dyn SubmissionStore>,
        progress: Arc<dyn ProgressStore>,
        limits: GradeLimits,
    ) -> Self {
        Self {
            judge,
            gate,
            problems,
            lifecycle: LifecycleManager::new(submissions),
            progress: ProgressUpdater::new(progress),
            limits,
        }
    }

    /// Grade and persist a submission against every visible and hidden case
    pub async fn submit(&self, req: SubmitRequest) -> Result<SubmissionResult, GradeError> {
        let (language, lang_config) =
            self.validate(&req.caller, &req.problem_id, &req.code, &req.language)?;
        let problem = self.load_problem(&req.problem_id, &req.caller).await?;
        self.check_compiles(&req.code, language).await?;

        let submission_id = self
            .lifecycle
            .open(&NewSubmission {
                user_id: req.caller.user_id.clone(),
                problem_id: problem.id.clone(),
                code: req.code.clone(),
                language,
                notes: req.notes.clone(),
                created_at: Utc::now(),
            })
            .await
            .map_err(GradeError::Persistence)?;

        let invocations = build_invocations(&req.code, &lang_config, problem.judged_cases());
        let verdict = match judge::execute_batch(self.judge.as_ref(), &invocations).await {
            Ok(results) => aggregator::aggregate(&problem, &results),
            Err(JudgeError::Timeout { attempts }) => {
                warn!(
                    "Submission {} timed out in the judge after {} polls",
                    submission_id, attempts
                );
                Verdict::judge_timeout(&problem, attempts)
            }
            Err(e) => {
                // Nothing to finalize; the record stays pending
                error!("Judge failed for submission {}: {}", submission_id, e);
                return Err(e.into());
            }
        };

        let accepted = self
            .lifecycle
            .finalize(submission_id, &verdict)
            .await
            .map_err(GradeError::Persistence)?;

        let progress = if accepted {
            let summary = self
                .progress
                .on_accepted(&req.caller.user_id, &problem.id, problem.difficulty)
                .await
                .map_err(GradeError::Persistence)?;
            Some(summary)
        } else {
            None
        };

        Ok(SubmissionResult {
            submission_id,
            problem: ProblemSummary::from(&problem),
            language,
            verdict,
            visible_count: problem.visible_count(),
            hidden_count: problem.hidden_count(),
            progress,
        })
    }

    /// Run against visible and custom cases without persisting anything
    pub async fn run(&self, req: RunRequest) -> Result<RunResult, GradeError> {
        let (language, lang_config) =
            self.validate(&req.caller, &req.problem_id, &req.code, &req.language)?;
        if req.custom_test_cases.len() > self.limits.max_custom_test_cases {
            return Err(GradeError::Validation(format!(
                "at most {} custom test cases are allowed",
                self.limits.max_custom_test_cases
            )));
        }

        let problem = self.load_problem(&req.problem_id, &req.caller).await?;
        self.check_compiles(&req.code, language).await?;

        let cases: Vec<TestCase> = problem
            .visible_test_cases
            .iter()
            .chain(req.custom_test_cases.iter())
            .cloned()
            .collect();
        let invocations = build_invocations(&req.code, &lang_config, cases.iter());
        let results = judge::execute_batch(self.judge.as_ref(), &invocations).await?;
        let summary = aggregator::summarize_run(&cases, problem.visible_count(), &results);

        info!(
            "Run by {} on {}: {}/{} passed",
            req.caller.user_id, problem.id, summary.passed, summary.total
        );

        Ok(RunResult {
            problem: ProblemSummary::from(&problem),
            language,
            summary,
        })
    }

    fn validate(
        &self,
        caller: &Caller,
        problem_id: &str,
        code: &str,
        language: &str,
    ) -> Result<(Language, LanguageConfig), GradeError> {
        if caller.user_id.trim().is_empty() || problem_id.trim().is_empty() {
            return Err(GradeError::Validation(
                "user id and problem id are required".into(),
            ));
        }
        if code.trim().is_empty() {
            return Err(GradeError::Validation("code is required".into()));
        }
        if code.len() > self.limits.max_code_bytes {
            return Err(GradeError::Validation(format!(
                "code exceeds {} bytes",
                self.limits.max_code_bytes
            )));
        }

        let language: Language = language
            .parse()
            .map_err(|e: anyhow::Error| GradeError::Validation(e.to_string()))?;
        let lang_config = languages::get_language_config(language).ok_or_else(|| {
            GradeError::Validation(format!("Unsupported language: {}", language))
        })?;

        Ok((language, lang_config))
    }

    async fn load_problem(&self, problem_id: &str, caller: &Caller) -> Result<Problem, GradeError> {
        let problem = self
            .problems
            .fetch(problem_id)
            .await
            .map_err(GradeError::Persistence)?
            .filter(|p| p.is_active)
            .ok_or_else(|| GradeError::NotFound(format!("problem {}", problem_id)))?;

        if problem.requires_premium(caller.is_premium) {
            return Err(GradeError::PremiumRequired);
        }

        Ok(problem)
    }

    async fn check_compiles(&self, code: &str, language: Language) -> Result<(), GradeError> {
        match self.gate.check_compiles(code, language).await {
            CompileCheck::Passed => Ok(()),
            CompileCheck::Failed { diagnostic } => {
                info!("Local compile gate rejected {} code", language);
                Err(GradeError::Compile { diagnostic })
            }
        }
    }
}

fn build_invocations<'a>(
    code: &str,
    lang_config: &LanguageConfig,
    cases: impl Iterator<Item = &'a TestCase>,
) -> Vec<TestInvocation> {
    cases
        .map(|case| TestInvocation {
            language_id: lang_config.judge_language_id,
            source_code: code.to_string(),
            stdin: case.input.clone(),
            expected_output: case.output.clone(),
        })
        .collect()
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::core::SubmissionStatus;
    use crate::judge::fake::FakeJudge;
    use crate::problem::sample_problem;
    use crate::progress::UserProgress;

    const PY: &str = "print(input())";

    fn echo_harness(visible: &[(&str, &str)], hidden: &[(&str, &str)]) -> Harness {
        let harness = Harness::new(FakeJudge::echo());
        harness.problems.insert(sample_problem(visible, hidden));
        harness
    }

    #[tokio::test]
    async fn test_accepted_submission_updates_progress() {
        let h = echo_harness(&[("1", "1"), ("2", "2")], &[("3", "3")]);

        let result = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();

        assert_eq!(result.verdict.status, SubmissionStatus::Accepted);
        assert_eq!((result.verdict.passed, result.verdict.total), (3, 3));
        assert_eq!(result.verdict.runtime_ms, 30);
        assert_eq!(result.verdict.memory_kb, 1000);
        assert_eq!(result.verdict.details.len(), 2);
        assert_eq!((result.visible_count, result.hidden_count), (2, 1));
        let stored = h.submissions.get(result.submission_id).unwrap();
        assert_eq!(stored.status, SubmissionStatus::Accepted);
        assert_eq!(stored.submission.language, Language::Python);
        assert_eq!(stored.submission.code, PY);

        match result.progress {
            Some(UpdateSummary::Updated {
                solved_count,
                ref new_badges,
                ..
            }) => {
                assert_eq!(solved_count, 1);
                assert_eq!(new_badges[0].name, "First Solve");
            }
            ref other => panic!("unexpected progress {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resubmission_reports_already_solved() {
        let h = echo_harness(&[("1", "1")], &[]);

        h.grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();
        let second = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();

        assert_eq!(second.submission_id, 2);
        assert_eq!(second.progress, Some(UpdateSummary::AlreadySolved));
        assert_eq!(h.progress.snapshot("u1").solved.len(), 1);
        assert_eq!(h.progress.snapshot("u1").badges.len(), 1);
    }

    #[tokio::test]
    async fn test_hidden_failure_is_wrong_answer() {
        let h = echo_harness(&[("1", "1"), ("2", "2")], &[("3", "4")]);

        let result = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();

        assert_eq!(result.verdict.status, SubmissionStatus::WrongAnswer);
        assert_eq!((result.verdict.passed, result.verdict.total), (2, 3));
        let indices: Vec<_> = result.verdict.details.iter().map(|d| d.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(result.verdict.details[2].input, None);
        assert_eq!(result.progress, None);
        assert!(h.progress.snapshot("u1").solved.is_empty());
        assert_eq!(
            h.submissions.status(result.submission_id),
            Some(SubmissionStatus::WrongAnswer)
        );
    }

    #[tokio::test]
    async fn test_cases_are_sent_visible_first() {
        let h = echo_harness(&[("a", "a"), ("b", "b")], &[("c", "c")]);

        h.grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();

        let submitted = h.judge.submitted();
        let stdin: Vec<_> = submitted.iter().map(|c| c.stdin.as_str()).collect();
        assert_eq!(stdin, vec!["a", "b", "c"]);
        assert!(submitted.iter().all(|c| c.language_id == 109));
        assert_eq!(h.judge.batches(), 1);
    }

    #[tokio::test]
    async fn test_invalid_cpp_never_reaches_judge() {
        let h = echo_harness(&[("1", "1")], &[]);

        let err = h
            .grader
            .submit(submit_request("u1", "int main( { return 0 }", "cpp"))
            .await
            .unwrap_err();

        match err {
            GradeError::Compile { diagnostic } => assert!(!diagnostic.is_empty()),
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(h.judge.batches(), 0);
        assert_eq!(h.submissions.count(), 0);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_call() {
        let h = echo_harness(&[("1", "1")], &[]);

        for req in [
            submit_request("u1", "   ", "python"),
            submit_request("u1", PY, "brainfuck"),
            submit_request("", PY, "python"),
            submit_request("u1", &"x".repeat(1001), "python"),
        ] {
            let err = h.grader.submit(req).await.unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
        }
        assert_eq!(h.judge.batches(), 0);
        assert_eq!(h.submissions.count(), 0);
    }

    #[tokio::test]
    async fn test_missing_and_inactive_problems_are_not_found() {
        let h = Harness::new(FakeJudge::echo());
        let err = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::NotFound(_)));

        let mut problem = sample_problem(&[("1", "1")], &[]);
        problem.is_active = false;
        h.problems.insert(problem);
        let err = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap_err();
        assert!(matches!(err, GradeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_premium_problem_requires_premium_caller() {
        let h = Harness::new(FakeJudge::echo());
        let mut problem = sample_problem(&[("1", "1")], &[]);
        problem.is_premium = true;
        h.problems.insert(problem);

        let err = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "PREMIUM_REQUIRED");

        let mut req = submit_request("u1", PY, "python");
        req.caller.is_premium = true;
        let result = h.grader.submit(req).await.unwrap();
        assert_eq!(result.verdict.status, SubmissionStatus::Accepted);
    }

    #[tokio::test]
    async fn test_unavailable_judge_leaves_submission_pending() {
        let h = Harness::new(FakeJudge::unavailable());
        h.problems.insert(sample_problem(&[("1", "1")], &[]));

        let err = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "JUDGE_UNAVAILABLE");
        assert!(err.retryable());
        assert_eq!(h.submissions.count(), 1);
        assert_eq!(h.submissions.status(1), Some(SubmissionStatus::Pending));
    }

    #[tokio::test]
    async fn test_judge_timeout_is_persisted_as_verdict() {
        let h = Harness::new(FakeJudge::new(|_| {
            Err(JudgeError::Timeout { attempts: 3 })
        }));
        h.problems.insert(sample_problem(&[("1", "1")], &[("2", "2")]));

        let result = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap();

        assert_eq!(result.verdict.status, SubmissionStatus::JudgeTimeout);
        assert_eq!(result.verdict.total, 2);
        assert_eq!(
            h.submissions.status(result.submission_id),
            Some(SubmissionStatus::JudgeTimeout)
        );
        assert_eq!(result.progress, None);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_surfaced() {
        let h = echo_harness(&[("1", "1")], &[]);
        h.submissions.fail_finalize();

        let err = h
            .grader
            .submit(submit_request("u1", PY, "python"))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "PERSISTENCE_ERROR");
        assert_eq!(h.submissions.status(1), Some(SubmissionStatus::Pending));
        assert!(h.progress.snapshot("u1").solved.is_empty());
    }

    #[tokio::test]
    async fn test_run_reports_custom_cases_without_persisting() {
        let h = echo_harness(&[("1", "1")], &[("secret", "secret")]);

        let result = h
            .grader
            .run(run_request(vec![
                TestCase::new("5", "5"),
                TestCase::new("6", "7"),
            ]))
            .await
            .unwrap();

        let summary = &result.summary;
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 2);
        assert!(!summary.all_passed);
        assert_eq!((summary.default_cases, summary.custom_cases), (1, 2));
        assert!(summary.cases.iter().all(|c| c.input != "secret"));
        assert_eq!(h.submissions.count(), 0);
        assert_eq!(h.progress.snapshot("u1"), UserProgress::default());
    }

    #[tokio::test]
    async fn test_run_limits_custom_cases() {
        let h = echo_harness(&[("1", "1")], &[]);

        let err = h
            .grader
            .run(run_request(vec![TestCase::new("1", "1"); 3]))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(h.judge.batches(), 0);
    }

    #[tokio::test]
    async fn test_run_timeout_is_an_error() {
        let h = Harness::new(FakeJudge::new(|_| {
            Err(JudgeError::Timeout { attempts: 2 })
        }));
        h.problems.insert(sample_problem(&[("1", "1")], &[]));

        let err = h.grader.run(run_request(Vec::new())).await.unwrap_err();
        assert_eq!(err.code(), "JUDGE_TIMEOUT");
    }
}
