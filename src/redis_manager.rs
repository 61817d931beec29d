//! Redis Manager - Centralized Redis connection and operations
//!
//! This module handles:
//! - Job queue operations (BLPOP) on a dedicated connection
//! - Reply storage and publishing
//! - Key layout shared with the Redis-backed stores

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tracing::{info, warn};

use crate::jobs::{JobReply, WorkerJob};

/// Redis key constants
pub mod keys {
    /// Grade job queue key
    pub const GRADE_QUEUE: &str = "grade:queue";

    /// Grade reply key prefix (for polling)
    pub const GRADE_RESULT_PREFIX: &str = "grade:result:";

    /// Grade reply channel (for pub/sub)
    pub const GRADE_RESULT_CHANNEL: &str = "grade:results";

    /// Submission id sequence
    pub const SUBMISSION_SEQ: &str = "submission:next_id";

    /// Problem document (JSON)
    pub fn problem(problem_id: &str) -> String {
        format!("problem:{}", problem_id)
    }

    /// Submission hash
    pub fn submission(submission_id: i64) -> String {
        format!("submission:{}", submission_id)
    }

    /// Submission ids of one user, oldest first
    pub fn user_submissions(user_id: &str) -> String {
        format!("user:{}:submissions", user_id)
    }

    /// Hash of problem id -> solved record (JSON)
    pub fn solved(user_id: &str) -> String {
        format!("user:{}:solved", user_id)
    }

    /// Streak (JSON)
    pub fn streak(user_id: &str) -> String {
        format!("user:{}:streak", user_id)
    }

    /// Hash of badge name -> badge (JSON)
    pub fn badges(user_id: &str) -> String {
        format!("user:{}:badges", user_id)
    }
}

const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour

/// Owns the queue connection and hands out shared connections
pub struct RedisManager {
    client: redis::Client,
    /// BLPOP blocks the whole pipeline, so the queue gets its own connection
    queue_conn: MultiplexedConnection,
    shared: ConnectionManager,
}

impl RedisManager {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let queue_conn = get_connection_with_retry(&client).await?;
        let shared = ConnectionManager::new(client.clone())
            .await
            .context("Failed to create Redis connection manager")?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            client,
            queue_conn,
            shared,
        })
    }

    /// Auto-reconnecting connection for stores and replies
    pub fn shared_connection(&self) -> ConnectionManager {
        self.shared.clone()
    }

    pub fn result_sink(&self) -> ResultSink {
        ResultSink {
            conn: self.shared.clone(),
        }
    }

    /// Block and wait for the next job from the queue.
    ///
    /// Unparseable payloads are logged and skipped.
    /// Automatically reconnects on connection failure.
    pub async fn pop_job(&mut self) -> Result<WorkerJob> {
        loop {
            let result: Option<(String, String)> =
                match self.queue_conn.blpop(keys::GRADE_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.queue_conn = get_connection_with_retry(&self.client).await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<WorkerJob>(&job_data) {
                    Ok(job) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }
}

/// Stores job replies for polling clients and publishes them for subscribers
#[derive(Clone)]
pub struct ResultSink {
    conn: ConnectionManager,
}

impl ResultSink {
    /// The reply is stored with a 1-hour expiration and also published
    /// to a channel for real-time subscribers.
    pub async fn store_reply(&self, reply: &JobReply) -> Result<()> {
        let json = serde_json::to_string(reply)?;
        let key = format!("{}{}", keys::GRADE_RESULT_PREFIX, reply.request_id);
        let mut conn = self.conn.clone();

        conn.set_ex::<_, _, ()>(&key, &json, RESULT_EXPIRY_SECS)
            .await
            .with_context(|| format!("Failed to store reply {}", key))?;

        // No subscribers is not an error
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::GRADE_RESULT_CHANNEL, &json)
            .await
        {
            warn!("Failed to publish reply {}: {}", reply.request_id, e);
        }

        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
