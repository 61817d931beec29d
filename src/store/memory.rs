//! In-memory stores for tests
//!
//! Same atomicity as the Redis stores: every check-and-write happens under
//! one lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::core::SubmissionStatus;
use crate::problem::{Difficulty, Problem, ProblemStore};
use crate::progress::{ProgressStore, SolveApplied, SolveUpdate, SolvedProblem, Streak, UserProgress};
use crate::submission::{FinalFields, FinalizeOutcome, NewSubmission, SubmissionStore};

#[derive(Clone, Default)]
pub struct MemoryProblemStore {
    problems: Arc<Mutex<HashMap<String, Problem>>>,
}

impl MemoryProblemStore {
    pub fn insert(&self, problem: Problem) {
        self.problems
            .lock()
            .unwrap()
            .insert(problem.id.clone(), problem);
    }
}

#[async_trait]
impl ProblemStore for MemoryProblemStore {
    async fn fetch(&self, problem_id: &str) -> Result<Option<Problem>> {
        Ok(self.problems.lock().unwrap().get(problem_id).cloned())
    }
}

#[derive(Debug, Clone)]
pub struct StoredSubmission {
    pub submission: NewSubmission,
    pub status: SubmissionStatus,
    pub fields: Option<FinalFields>,
}

#[derive(Clone, Default)]
pub struct MemorySubmissionStore {
    records: Arc<Mutex<Vec<StoredSubmission>>>,
    fail_finalize: Arc<AtomicBool>,
}

impl MemorySubmissionStore {
    /// Make every following finalize call fail
    pub fn fail_finalize(&self) {
        self.fail_finalize.store(true, Ordering::SeqCst);
    }

    pub fn status(&self, id: i64) -> Option<SubmissionStatus> {
        self.get(id).map(|r| r.status)
    }

    pub fn fields(&self, id: i64) -> Option<FinalFields> {
        self.get(id).and_then(|r| r.fields)
    }

    pub fn get(&self, id: i64) -> Option<StoredSubmission> {
        let index = usize::try_from(id).ok()?.checked_sub(1)?;
        self.records.lock().unwrap().get(index).cloned()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionStore for MemorySubmissionStore {
    async fn create(&self, submission: &NewSubmission) -> Result<i64> {
        let mut records = self.records.lock().unwrap();
        records.push(StoredSubmission {
            submission: submission.clone(),
            status: SubmissionStatus::Pending,
            fields: None,
        });
        Ok(records.len() as i64)
    }

    async fn finalize(&self, submission_id: i64, fields: &FinalFields) -> Result<FinalizeOutcome> {
        if self.fail_finalize.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }

        let mut records = self.records.lock().unwrap();
        let record = usize::try_from(submission_id)
            .ok()
            .and_then(|id| id.checked_sub(1))
            .and_then(|index| records.get_mut(index))
            .ok_or_else(|| anyhow::anyhow!("Submission {} not found", submission_id))?;

        if record.status == SubmissionStatus::Pending {
            record.status = fields.status;
            record.fields = Some(fields.clone());
            Ok(FinalizeOutcome::Written)
        } else if record.status == fields.status {
            Ok(FinalizeOutcome::Unchanged)
        } else {
            Ok(FinalizeOutcome::Rejected {
                current: record.status,
            })
        }
    }
}

#[derive(Clone, Default)]
pub struct MemoryProgressStore {
    users: Arc<Mutex<HashMap<String, UserProgress>>>,
    fail_next_apply: Arc<AtomicBool>,
}

impl MemoryProgressStore {
    /// Make the next `apply_solve` call fail without writing anything
    pub fn fail_next_apply(&self) {
        self.fail_next_apply.store(true, Ordering::SeqCst);
    }

    pub fn snapshot(&self, user_id: &str) -> UserProgress {
        self.users
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn seed_streak(&self, user_id: &str, streak: Streak) {
        self.users
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .streak = streak;
    }

    pub fn seed_solved(&self, user_id: &str, problem_id: &str) {
        self.users
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .solved
            .push(SolvedProblem {
                problem_id: problem_id.to_string(),
                difficulty: Difficulty::Easy,
                solved_at: chrono::Utc::now(),
            });
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn load(&self, user_id: &str) -> Result<UserProgress> {
        Ok(self.snapshot(user_id))
    }

    async fn apply_solve(&self, user_id: &str, update: &SolveUpdate) -> Result<Option<SolveApplied>> {
        if self.fail_next_apply.swap(false, Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }

        let mut users = self.users.lock().unwrap();
        let progress = users.entry(user_id.to_string()).or_default();
        if progress.has_solved(&update.solved.problem_id) {
            return Ok(None);
        }

        progress.solved.push(update.solved.clone());
        progress.streak = update.streak;

        let solved_count = progress.solved.len();
        let mut awarded = Vec::new();
        for grant in &update.badges {
            if solved_count >= grant.min_solved && !progress.has_badge(&grant.badge.name) {
                progress.badges.push(grant.badge.clone());
                awarded.push(grant.badge.name.clone());
            }
        }

        Ok(Some(SolveApplied {
            solved_count,
            awarded,
        }))
    }
}
