//! Worker configuration
//!
//! Every tunable is read from the environment (after `.env` is loaded) and
//! falls back to a default suitable for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Settings for the judge sandbox client
#[derive(Debug, Clone)]
pub struct JudgeConfig {
    /// Base URL of the sandbox API
    pub base_url: String,
    /// Sent as `x-rapidapi-key` when set
    pub api_key: Option<String>,
    /// Sent as `x-rapidapi-host` when set
    pub api_host: Option<String>,
    /// Sleep between two poll rounds
    pub poll_interval: Duration,
    /// Number of poll rounds before giving up with a timeout
    pub max_poll_attempts: u32,
    /// Maximum invocations per batch request
    pub batch_size: usize,
    /// Timeout for a single HTTP request
    pub request_timeout: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: "https://judge0-ce.p.rapidapi.com".into(),
            api_key: None,
            api_host: None,
            poll_interval: Duration::from_millis(1000),
            max_poll_attempts: 60,
            batch_size: 20,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for the local compile gate
#[derive(Debug, Clone)]
pub struct CompileGateConfig {
    /// Root under which per-invocation scratch directories are created
    pub scratch_dir: PathBuf,
    /// Wall-clock limit for the local compiler
    pub timeout: Duration,
}

impl Default for CompileGateConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("grader-scratch"),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Request validation limits
#[derive(Debug, Clone)]
pub struct GradeLimits {
    pub max_code_bytes: usize,
    pub max_custom_test_cases: usize,
}

impl Default for GradeLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: 50_000,
            max_custom_test_cases: 10,
        }
    }
}

/// Full worker configuration
#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub redis_url: String,
    pub judge: JudgeConfig,
    pub compile_gate: CompileGateConfig,
    pub limits: GradeLimits,
    /// Number of grading pipelines allowed in flight at once
    pub max_concurrent_jobs: usize,
}

impl GraderConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let judge_defaults = JudgeConfig::default();
        let gate_defaults = CompileGateConfig::default();
        let limit_defaults = GradeLimits::default();

        let judge = JudgeConfig {
            base_url: std::env::var("JUDGE0_URL").unwrap_or(judge_defaults.base_url),
            api_key: std::env::var("JUDGE0_API_KEY").ok().filter(|v| !v.is_empty()),
            api_host: std::env::var("JUDGE0_API_HOST").ok().filter(|v| !v.is_empty()),
            poll_interval: Duration::from_millis(env_or("JUDGE0_POLL_INTERVAL_MS", 1000u64)?),
            max_poll_attempts: env_or("JUDGE0_MAX_POLL_ATTEMPTS", judge_defaults.max_poll_attempts)?,
            batch_size: env_or("JUDGE0_BATCH_SIZE", judge_defaults.batch_size)?,
            request_timeout: Duration::from_secs(env_or("JUDGE0_REQUEST_TIMEOUT_SECS", 10u64)?),
        };

        if judge.batch_size == 0 {
            anyhow::bail!("JUDGE0_BATCH_SIZE must be at least 1");
        }
        if judge.max_poll_attempts == 0 {
            anyhow::bail!("JUDGE0_MAX_POLL_ATTEMPTS must be at least 1");
        }

        let compile_gate = CompileGateConfig {
            scratch_dir: std::env::var("COMPILE_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or(gate_defaults.scratch_dir),
            timeout: Duration::from_secs(env_or("COMPILE_TIMEOUT_SECS", 15u64)?),
        };

        let limits = GradeLimits {
            max_code_bytes: env_or("MAX_CODE_BYTES", limit_defaults.max_code_bytes)?,
            max_custom_test_cases: env_or(
                "MAX_CUSTOM_TEST_CASES",
                limit_defaults.max_custom_test_cases,
            )?,
        };

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".into()),
            judge,
            compile_gate,
            limits,
            max_concurrent_jobs: env_or("MAX_CONCURRENT_JOBS", 8usize)?.max(1),
        })
    }
}

/// Read and parse an environment variable, using `default` when it is unset
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_when_unset() {
        let value: u32 = env_or("GRADER_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        std::env::set_var("GRADER_TEST_GARBAGE_VAR", "not-a-number");
        let result: anyhow::Result<u32> = env_or("GRADER_TEST_GARBAGE_VAR", 7);
        assert!(result.is_err());
        std::env::remove_var("GRADER_TEST_GARBAGE_VAR");
    }

    #[test]
    fn test_defaults_keep_one_second_poll() {
        let config = JudgeConfig::default();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 20);
    }
}
