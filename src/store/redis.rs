//! Redis-backed stores
//!
//! Problems are JSON documents, submissions are hashes, user progress is
//! split into a solved hash, a streak document and a badges hash. The two
//! conditional writes (finalize and add-solved) run as Lua scripts so the
//! check and the write are one atomic step on the server.

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use serde::de::DeserializeOwned;

use crate::core::SubmissionStatus;
use crate::problem::{Problem, ProblemStore};
use crate::progress::{
    Badge, ProgressStore, SolveApplied, SolveUpdate, SolvedProblem, Streak, UserProgress,
};
use crate::redis_manager::keys;
use crate::submission::{FinalFields, FinalizeOutcome, NewSubmission, SubmissionStore};

/// Write terminal fields only while the status is still pending
const FINALIZE_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return {'missing', ''}
end
if current == 'pending' then
  redis.call('HSET', KEYS[1],
    'status', ARGV[1],
    'error_message', ARGV[2],
    'passed', ARGV[3],
    'total', ARGV[4],
    'runtime_ms', ARGV[5],
    'memory_kb', ARGV[6])
  return {'written', current}
end
if current == ARGV[1] then
  return {'unchanged', current}
end
return {'rejected', current}
"#;

/// Record a solve if the problem is absent from the solved hash: add it,
/// write the streak, then grant each offered badge whose solved-count floor
/// is met and that the user lacks. Returns `{-1, {}}` when already solved,
/// otherwise `{solved_count, awarded_names}`.
///
/// ARGV: problem id, solved JSON, streak JSON, then (min_solved, name, badge
/// JSON) triples.
const APPLY_SOLVE_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return {-1, {}}
end
redis.call('SET', KEYS[2], ARGV[3])
local count = redis.call('HLEN', KEYS[1])
local awarded = {}
for i = 4, #ARGV, 3 do
  if count >= tonumber(ARGV[i]) and redis.call('HSETNX', KEYS[3], ARGV[i + 1], ARGV[i + 2]) == 1 then
    table.insert(awarded, ARGV[i + 1])
  end
end
return {count, awarded}
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    finalize_script: Script,
    apply_solve_script: Script,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            finalize_script: Script::new(FINALIZE_SCRIPT),
            apply_solve_script: Script::new(APPLY_SOLVE_SCRIPT),
        }
    }
}

fn parse_json<T: DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("Corrupt {} record", what))
}

fn finalize_outcome(kind: &str, current: &str, submission_id: i64) -> Result<FinalizeOutcome> {
    match kind {
        "written" => Ok(FinalizeOutcome::Written),
        "unchanged" => Ok(FinalizeOutcome::Unchanged),
        "rejected" => Ok(FinalizeOutcome::Rejected {
            current: current.parse::<SubmissionStatus>()?,
        }),
        "missing" => anyhow::bail!("Submission {} not found", submission_id),
        other => anyhow::bail!("Unexpected finalize reply: {}", other),
    }
}

#[async_trait]
impl ProblemStore for RedisStore {
    async fn fetch(&self, problem_id: &str) -> Result<Option<Problem>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(keys::problem(problem_id))
            .await
            .with_context(|| format!("Failed to fetch problem {}", problem_id))?;

        raw.map(|json| parse_json(&json, "problem")).transpose()
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn create(&self, submission: &NewSubmission) -> Result<i64> {
        let mut conn = self.conn.clone();
        let id: i64 = conn
            .incr(keys::SUBMISSION_SEQ, 1)
            .await
            .context("Failed to allocate submission id")?;

        let notes = match &submission.notes {
            Some(notes) => serde_json::to_string(notes)?,
            None => String::new(),
        };
        let fields = [
            ("user_id", submission.user_id.clone()),
            ("problem_id", submission.problem_id.clone()),
            ("code", submission.code.clone()),
            ("language", submission.language.to_string()),
            ("status", SubmissionStatus::Pending.to_string()),
            ("notes", notes),
            ("created_at", submission.created_at.to_rfc3339()),
        ];

        redis::pipe()
            .atomic()
            .hset_multiple(keys::submission(id), &fields)
            .ignore()
            .rpush(keys::user_submissions(&submission.user_id), id)
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .with_context(|| format!("Failed to write submission {}", id))?;

        Ok(id)
    }

    async fn finalize(&self, submission_id: i64, fields: &FinalFields) -> Result<FinalizeOutcome> {
        let mut conn = self.conn.clone();
        let (kind, current): (String, String) = self
            .finalize_script
            .key(keys::submission(submission_id))
            .arg(fields.status.as_str())
            .arg(&fields.error_message)
            .arg(fields.passed)
            .arg(fields.total)
            .arg(fields.runtime_ms)
            .arg(fields.memory_kb)
            .invoke_async(&mut conn)
            .await?;

        finalize_outcome(&kind, &current, submission_id)
    }
}

#[async_trait]
impl ProgressStore for RedisStore {
    async fn load(&self, user_id: &str) -> Result<UserProgress> {
        let mut conn = self.conn.clone();
        let solved: Vec<String> = conn.hvals(keys::solved(user_id)).await?;
        let streak: Option<String> = conn.get(keys::streak(user_id)).await?;
        let badges: Vec<String> = conn.hvals(keys::badges(user_id)).await?;

        let mut solved = solved
            .iter()
            .map(|raw| parse_json::<SolvedProblem>(raw, "solved problem"))
            .collect::<Result<Vec<_>>>()?;
        solved.sort_by_key(|s| s.solved_at);

        let mut badges = badges
            .iter()
            .map(|raw| parse_json::<Badge>(raw, "badge"))
            .collect::<Result<Vec<_>>>()?;
        badges.sort_by_key(|b| b.earned_at);

        let streak = match streak {
            Some(raw) => parse_json(&raw, "streak")?,
            None => Streak::default(),
        };

        Ok(UserProgress {
            solved,
            streak,
            badges,
        })
    }

    async fn apply_solve(&self, user_id: &str, update: &SolveUpdate) -> Result<Option<SolveApplied>> {
        let mut conn = self.conn.clone();
        let mut invocation = self.apply_solve_script.prepare_invoke();
        invocation
            .key(keys::solved(user_id))
            .key(keys::streak(user_id))
            .key(keys::badges(user_id))
            .arg(&update.solved.problem_id)
            .arg(serde_json::to_string(&update.solved)?)
            .arg(serde_json::to_string(&update.streak)?);
        for grant in &update.badges {
            invocation
                .arg(grant.min_solved)
                .arg(&grant.badge.name)
                .arg(serde_json::to_string(&grant.badge)?);
        }

        let (count, awarded): (i64, Vec<String>) = invocation
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Failed to apply solve for user {}", user_id))?;

        Ok(usize::try_from(count).ok().map(|solved_count| SolveApplied {
            solved_count,
            awarded,
        }))
    }
}
