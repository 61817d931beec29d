//! Judge0 sandbox client
//!
//! Talks to the batch endpoints of a Judge0 instance:
//! - `POST /submissions/batch` queues invocations and returns tokens
//! - `GET /submissions/batch?tokens=...` fetches the status of many tokens at once
//!
//! Source, stdin and outputs travel base64-encoded so arbitrary bytes survive
//! the JSON round-trip.

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::{header, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Judge, JudgeError, JudgeResult, JudgeStatus, TestInvocation, Token};
use crate::config::JudgeConfig;

const STATUS_FIELDS: &str = "token,status_id,time,memory,stdout,stderr,compile_output,message";

#[derive(Debug, Serialize)]
struct BatchRequest {
    submissions: Vec<WireSubmission>,
}

#[derive(Debug, Serialize)]
struct WireSubmission {
    language_id: u32,
    source_code: String,
    stdin: String,
    expected_output: String,
}

/// One entry of the submit response; rejected entries carry errors instead of a token
#[derive(Debug, Deserialize)]
struct WireToken {
    token: Option<String>,
    #[serde(flatten)]
    errors: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BatchStatusResponse {
    submissions: Vec<Option<WireStatus>>,
}

#[derive(Debug, Deserialize)]
struct WireStatus {
    status_id: Option<u32>,
    /// Seconds as a decimal string, e.g. "0.021"
    time: Option<String>,
    /// Kilobytes
    memory: Option<u64>,
    stdout: Option<String>,
    stderr: Option<String>,
    compile_output: Option<String>,
    message: Option<String>,
}

/// HTTP client for a Judge0 instance
pub struct Judge0Client {
    client: Client,
    config: JudgeConfig,
}

impl Judge0Client {
    pub fn new(config: JudgeConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));
        if let Some(key) = &config.api_key {
            headers.insert(
                "x-rapidapi-key",
                header::HeaderValue::from_str(key).context("Invalid JUDGE0_API_KEY")?,
            );
        }
        if let Some(host) = &config.api_host {
            headers.insert(
                "x-rapidapi-host",
                header::HeaderValue::from_str(host).context("Invalid JUDGE0_API_HOST")?,
            );
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build judge HTTP client")?;

        info!("Judge0 client configured for {}", config.base_url);

        Ok(Self { client, config })
    }

    fn batch_url(&self) -> String {
        format!("{}/submissions/batch", self.config.base_url.trim_end_matches('/'))
    }

    async fn submit_chunk(&self, chunk: &[TestInvocation]) -> Result<Vec<Token>, JudgeError> {
        let body = BatchRequest {
            submissions: chunk
                .iter()
                .map(|case| WireSubmission {
                    language_id: case.language_id,
                    source_code: STANDARD.encode(&case.source_code),
                    stdin: STANDARD.encode(&case.stdin),
                    expected_output: STANDARD.encode(&case.expected_output),
                })
                .collect(),
        };

        let response = self
            .client
            .post(self.batch_url())
            .query(&[("base64_encoded", "true")])
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let entries: Vec<WireToken> = response.json().await?;
        if entries.len() != chunk.len() {
            return Err(JudgeError::Malformed(format!(
                "submitted {} cases, received {} tokens",
                chunk.len(),
                entries.len()
            )));
        }

        entries
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| match entry.token {
                Some(token) if !token.is_empty() => Ok(Token(token)),
                _ => Err(JudgeError::Malformed(format!(
                    "case {} rejected: {}",
                    idx,
                    serde_json::Value::Object(entry.errors)
                ))),
            })
            .collect()
    }

    async fn fetch_chunk(&self, chunk: &[Token]) -> Result<Vec<JudgeResult>, JudgeError> {
        let joined = chunk
            .iter()
            .map(|t| t.0.as_str())
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .client
            .get(self.batch_url())
            .query(&[
                ("tokens", joined.as_str()),
                ("base64_encoded", "true"),
                ("fields", STATUS_FIELDS),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: BatchStatusResponse = response.json().await?;
        if body.submissions.len() != chunk.len() {
            return Err(JudgeError::Malformed(format!(
                "polled {} tokens, received {} statuses",
                chunk.len(),
                body.submissions.len()
            )));
        }

        body.submissions
            .into_iter()
            .zip(chunk)
            .map(|(status, token)| match status {
                Some(status) => decode_status(status),
                None => Err(JudgeError::Malformed(format!("unknown token {}", token.0))),
            })
            .collect()
    }

    /// Fetch the current status of every token, preserving order
    async fn fetch_statuses(&self, tokens: &[Token]) -> Result<Vec<JudgeResult>, JudgeError> {
        let mut results = Vec::with_capacity(tokens.len());
        for chunk in tokens.chunks(self.config.batch_size) {
            results.extend(self.fetch_chunk(chunk).await?);
        }
        Ok(results)
    }
}

#[async_trait]
impl Judge for Judge0Client {
    async fn submit_batch(&self, cases: &[TestInvocation]) -> Result<Vec<Token>, JudgeError> {
        let mut tokens = Vec::with_capacity(cases.len());
        for chunk in cases.chunks(self.config.batch_size) {
            tokens.extend(self.submit_chunk(chunk).await?);
        }
        debug!("Queued {} invocations on the judge", tokens.len());
        Ok(tokens)
    }

    async fn poll_until_complete(&self, tokens: &[Token]) -> Result<Vec<JudgeResult>, JudgeError> {
        let max_attempts = self.config.max_poll_attempts;

        for attempt in 1..=max_attempts {
            let results = self.fetch_statuses(tokens).await?;
            let pending = results.iter().filter(|r| !r.status.is_terminal()).count();
            if pending == 0 {
                debug!("All {} results terminal after {} polls", results.len(), attempt);
                return Ok(results);
            }

            debug!(
                "Poll {}/{}: {} of {} results still pending",
                attempt,
                max_attempts,
                pending,
                results.len()
            );
            if attempt < max_attempts {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }

        warn!(
            "Judge still busy after {} polls for {} tokens",
            max_attempts,
            tokens.len()
        );
        Err(JudgeError::Timeout {
            attempts: max_attempts,
        })
    }
}

fn decode_status(wire: WireStatus) -> Result<JudgeResult, JudgeError> {
    let status_id = wire
        .status_id
        .ok_or_else(|| JudgeError::Malformed("missing status_id".into()))?;

    Ok(JudgeResult {
        status: JudgeStatus::try_from(status_id)?,
        time_ms: parse_seconds_as_ms(wire.time.as_deref())?,
        memory_kb: wire.memory.unwrap_or(0),
        stdout: decode_text(wire.stdout)?,
        stderr: decode_text(wire.stderr)?,
        compile_output: decode_text(wire.compile_output)?,
        message: decode_text(wire.message)?,
    })
}

/// "0.35" -> 350
fn parse_seconds_as_ms(time: Option<&str>) -> Result<u64, JudgeError> {
    let Some(raw) = time.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(0);
    };

    let seconds: f64 = raw
        .parse()
        .map_err(|_| JudgeError::Malformed(format!("invalid time {:?}", raw)))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(JudgeError::Malformed(format!("invalid time {:?}", raw)));
    }

    Ok((seconds * 1000.0).round() as u64)
}

/// Judge0 wraps base64 output at 60 columns, so whitespace is stripped first
fn decode_text(encoded: Option<String>) -> Result<Option<String>, JudgeError> {
    let Some(encoded) = encoded else {
        return Ok(None);
    };

    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| JudgeError::Malformed(format!("invalid base64 output: {}", e)))?;

    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
