use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::GradeError;
use crate::grader::{Grader, RunRequest, RunResult, SubmissionResult, SubmitRequest};

/// Worker job enum - represents different types of jobs the worker can process
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Grade and persist a submission
    #[serde(rename = "submit")]
    Submit(SubmitJob),
    /// Evaluate against visible and custom cases, nothing persisted
    #[serde(rename = "run")]
    Run(RunJob),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJob {
    /// Correlates the reply with the waiting HTTP request
    pub request_id: String,
    #[serde(flatten)]
    pub request: SubmitRequest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunJob {
    pub request_id: String,
    #[serde(flatten)]
    pub request: RunRequest,
}

impl WorkerJob {
    pub fn request_id(&self) -> &str {
        match self {
            WorkerJob::Submit(job) => &job.request_id,
            WorkerJob::Run(job) => &job.request_id,
        }
    }
}

/// Error payload of a reply
#[derive(Debug, Serialize)]
pub struct ErrorReply {
    /// Machine-readable error code, e.g. `COMPILATION_ERROR`
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl From<&GradeError> for ErrorReply {
    fn from(e: &GradeError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            retryable: e.retryable(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplyBody {
    Submitted { result: SubmissionResult },
    Ran { result: RunResult },
    Failed { error: ErrorReply },
}

/// Reply stored for the caller of a job
#[derive(Debug, Serialize)]
pub struct JobReply {
    pub request_id: String,
    #[serde(flatten)]
    pub body: ReplyBody,
}

/// Process one job to completion; every job gets exactly one reply
pub async fn process_job(grader: &Grader, job: WorkerJob) -> JobReply {
    let request_id = job.request_id().to_string();

    let body = match job {
        WorkerJob::Submit(job) => {
            info!(
                "Received submit job: request_id={}, problem={}, language={}",
                request_id, job.request.problem_id, job.request.language
            );
            match grader.submit(job.request).await {
                Ok(result) => {
                    info!(
                        "Submit job completed: request_id={}, submission_id={}, status={}",
                        request_id, result.submission_id, result.verdict.status
                    );
                    ReplyBody::Submitted { result }
                }
                Err(e) => failed(&request_id, e),
            }
        }
        WorkerJob::Run(job) => {
            info!(
                "Received run job: request_id={}, problem={}, language={}",
                request_id, job.request.problem_id, job.request.language
            );
            match grader.run(job.request).await {
                Ok(result) => {
                    info!(
                        "Run job completed: request_id={}, passed={}/{}",
                        request_id, result.summary.passed, result.summary.total
                    );
                    ReplyBody::Ran { result }
                }
                Err(e) => failed(&request_id, e),
            }
        }
    };

    JobReply { request_id, body }
}

fn failed(request_id: &str, e: GradeError) -> ReplyBody {
    if e.retryable() {
        warn!("Job {} failed ({}): {}", request_id, e.code(), e);
    } else {
        info!("Job {} rejected ({}): {}", request_id, e.code(), e);
    }
    ReplyBody::Failed {
        error: ErrorReply::from(&e),
    }
}
