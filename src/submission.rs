//! Submission lifecycle manager
//!
//! A submission is created `pending` and finalized exactly once. The store
//! enforces the single transition with a compare-and-set on the status, so a
//! second finalize can only ever repeat the same verdict.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregator::Verdict;
use crate::core::SubmissionStatus;
use crate::languages::Language;

/// Optional caller-supplied notes stored alongside the code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionNotes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_taken_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSubmission {
    pub user_id: String,
    pub problem_id: String,
    pub code: String,
    pub language: Language,
    pub notes: Option<SubmissionNotes>,
    pub created_at: DateTime<Utc>,
}

/// Terminal fields written by `finalize`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalFields {
    pub status: SubmissionStatus,
    pub error_message: String,
    pub passed: usize,
    pub total: usize,
    pub runtime_ms: u64,
    pub memory_kb: u64,
}

impl From<&Verdict> for FinalFields {
    fn from(verdict: &Verdict) -> Self {
        Self {
            status: verdict.status,
            error_message: verdict.error_message.clone(),
            passed: verdict.passed,
            total: verdict.total,
            runtime_ms: verdict.runtime_ms,
            memory_kb: verdict.memory_kb,
        }
    }
}

/// What the store did with a finalize request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// pending -> terminal
    Written,
    /// Already terminal with the same status
    Unchanged,
    /// Already terminal with a different status; nothing written
    Rejected { current: SubmissionStatus },
}

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Persist a new `pending` submission and return its id
    async fn create(&self, submission: &NewSubmission) -> Result<i64>;

    /// Write the terminal fields iff the submission is still `pending`
    async fn finalize(&self, submission_id: i64, fields: &FinalFields) -> Result<FinalizeOutcome>;
}

pub struct LifecycleManager {
    store: Arc<dyn SubmissionStore>,
}

impl LifecycleManager {
    pub fn new(store: Arc<dyn SubmissionStore>) -> Self {
        Self { store }
    }

    pub async fn open(&self, submission: &NewSubmission) -> Result<i64> {
        let id = self
            .store
            .create(submission)
            .await
            .context("Failed to create submission")?;
        info!(
            "Created submission {} (user={}, problem={}, language={})",
            id, submission.user_id, submission.problem_id, submission.language
        );
        Ok(id)
    }

    /// Persist the verdict. Returns true when post-acceptance updates should run.
    ///
    /// Re-finalizing with the same verdict is a no-op that still reports
    /// acceptance, so a retried request completes its progress update.
    pub async fn finalize(&self, submission_id: i64, verdict: &Verdict) -> Result<bool> {
        if !verdict.status.is_terminal() {
            anyhow::bail!("Cannot finalize submission {} as pending", submission_id);
        }

        let fields = FinalFields::from(verdict);
        let outcome = self
            .store
            .finalize(submission_id, &fields)
            .await
            .with_context(|| format!("Failed to finalize submission {}", submission_id))?;

        match outcome {
            FinalizeOutcome::Written => {
                info!(
                    "Submission {} finalized: {} ({}/{})",
                    submission_id, fields.status, fields.passed, fields.total
                );
            }
            FinalizeOutcome::Unchanged => {
                info!(
                    "Submission {} already finalized as {}",
                    submission_id, fields.status
                );
            }
            FinalizeOutcome::Rejected { current } => {
                warn!(
                    "Refusing to overwrite submission {}: stored {} but got {}",
                    submission_id, current, fields.status
                );
                return Ok(false);
            }
        }

        Ok(fields.status.is_accepted())
    }
}
