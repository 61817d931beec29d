mod aggregator;
mod compiler;
mod config;
mod core;
mod error;
mod grader;
mod jobs;
mod judge;
mod languages;
mod problem;
mod progress;
mod redis_manager;
mod store;
mod submission;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::compiler::CompileGate;
use crate::config::GraderConfig;
use crate::grader::Grader;
use crate::judge::Judge0Client;
use crate::redis_manager::RedisManager;
use crate::store::RedisStore;

/// Scratch directories older than this are leftovers from a crashed worker
const STALE_SCRATCH_AGE: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("grader=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    languages::init_languages()?;
    info!("Loaded language configurations");

    let config = GraderConfig::from_env()?;
    info!("Starting Grading Worker...");

    let gate = CompileGate::new(&config.compile_gate);
    match gate.sweep_stale(STALE_SCRATCH_AGE).await {
        Ok(removed) => info!(
            "Compile gate scratch root {:?} ready ({} stale removed)",
            config.compile_gate.scratch_dir, removed
        ),
        Err(e) => warn!("Failed to sweep compile gate scratch root: {:#}", e),
    }

    let judge = Judge0Client::new(config.judge.clone())?;
    info!("Judge sandbox at {}", config.judge.base_url);

    let mut redis = RedisManager::connect(&config.redis_url).await?;
    let store = Arc::new(RedisStore::new(redis.shared_connection()));
    let sink = redis.result_sink();

    let grader = Arc::new(Grader::new(
        Arc::new(judge),
        gate,
        store.clone(),
        store.clone(),
        store,
        config.limits.clone(),
    ));

    // Each job runs on its own task; the semaphore bounds how many are in flight
    let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
    info!(
        "Waiting for jobs (up to {} concurrent)...",
        config.max_concurrent_jobs
    );

    loop {
        let permit = permits.clone().acquire_owned().await?;
        let job = redis.pop_job().await?;

        let grader = grader.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let reply = jobs::process_job(&grader, job).await;
            if let Err(e) = sink.store_reply(&reply).await {
                error!("Failed to store reply {}: {:#}", reply.request_id, e);
            }
            drop(permit);
        });
    }
}
