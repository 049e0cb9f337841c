//! Execution worker service.
//!
//! ```text
//! Redis stream (exec:{pool}:jobs)
//!   ↓ (consumer group: exec_workers)
//! StreamWorker<ExecutionJob, ExecutionProcessor>
//!   ↓ sandbox (Docker) → judge → PostgreSQL
//! ```
//!
//! Concurrency is bounded by `MAX_CONCURRENT_JOBS`; SIGTERM/SIGINT drains
//! in-flight jobs for up to 30 seconds before the process force-exits.

mod health;

use blobstore::{BlobStore, FsBlobStore};
use core_config::{env_or_default, env_parse_or, Environment, FromEnv};
use database::postgres::{connect_from_config_with_retry, PostgresConfig};
use database::redis::RedisConfig;
use domain_submissions::{
    dlq_stream_name, jobs_stream_name, ExecutionJob, ExecutionProcessor, PgSubmissionRepository,
};
use eyre::{Result, WrapErr};
use sandbox::{sweep_stale_workspaces, ContainerRuntime, DockerRuntime, ExecutionHarness, HarnessConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, HealthState, StreamWorker, WorkerConfig,
};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Drain budget after a shutdown signal before the process force-exits.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

/// Stale-workspace age swept at startup.
const WORKSPACE_SWEEP_AGE: Duration = Duration::from_secs(3600);

pub async fn run() -> Result<()> {
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    stream_worker::metrics::init_metrics();

    info!(
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
        environment = ?environment,
        "Starting execution worker"
    );

    // Environment contract
    let pool_name = env_or_default("POOL_NAME", "container");
    let health_port: u16 = env_parse_or("HEALTH_PORT", 8081)?;
    let max_concurrent_jobs: usize = env_parse_or("MAX_CONCURRENT_JOBS", 2)?;
    let poll_interval_ms: u64 = env_parse_or("POLL_INTERVAL_MS", 1000)?;
    let max_attempts: u32 = env_parse_or("MAX_JOB_ATTEMPTS", 3)?;
    let backoff_base_ms: u64 = env_parse_or("RETRY_BACKOFF_BASE_MS", 2000)?;
    let backoff_max_ms: u64 = env_parse_or("RETRY_BACKOFF_MAX_MS", 20_000)?;
    let workspace_base = PathBuf::from(env_or_default(
        "WORKSPACE_BASE",
        &std::env::temp_dir().to_string_lossy(),
    ));
    let blob_root = PathBuf::from(env_or_default("BLOB_STORE_ROOT", "/var/lib/crucible/blobs"));
    let dlq_admin_token = std::env::var("DLQ_ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
    let dlq_allow_ips: Vec<String> = std::env::var("DLQ_ALLOW_IPS")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    // Crash recovery: other workers' live workspaces are younger than the
    // sweep age
    match sweep_stale_workspaces(&workspace_base, WORKSPACE_SWEEP_AGE) {
        Ok(0) => {}
        Ok(swept) => info!(swept, "Swept stale workspaces"),
        Err(e) => warn!(error = %e, "Workspace sweep failed"),
    }

    // Backing stores
    let pg_config = PostgresConfig::from_env().wrap_err("Failed to load PostgreSQL config")?;
    let db = connect_from_config_with_retry(pg_config, None)
        .await
        .wrap_err("Failed to connect to PostgreSQL")?;

    let redis_config = RedisConfig::from_env().wrap_err("Failed to load Redis config")?;
    let redis = database::redis::connect_from_config_with_retry(redis_config, None)
        .await
        .wrap_err("Failed to connect to Redis")?;

    let blobs = Arc::new(FsBlobStore::new(&blob_root));
    blobs
        .ping()
        .await
        .wrap_err("Blob store root is not readable")?;

    // Sandbox runtime
    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect().wrap_err("Failed to connect to Docker")?);
    runtime
        .ping()
        .await
        .map_err(|e| eyre::eyre!("Container runtime unreachable: {}", e))?;
    info!("Container runtime reachable");

    let harness = Arc::new(ExecutionHarness::new(
        runtime.clone(),
        HarnessConfig {
            workspace_base,
            ..Default::default()
        },
    ));

    let repository = Arc::new(PgSubmissionRepository::new(db.clone()));
    let processor = ExecutionProcessor::new(
        repository,
        blobs.clone(),
        harness,
        max_attempts,
    );

    let jobs_stream = jobs_stream_name(&pool_name);
    let dlq_stream = dlq_stream_name(&pool_name);

    let worker_config = WorkerConfig::new(jobs_stream.clone(), "exec_workers")
        .with_dlq_stream(dlq_stream.clone())
        .with_blocking(Some(5000))
        .with_poll_interval_ms(poll_interval_ms)
        .with_max_concurrent_jobs(max_concurrent_jobs)
        .with_max_attempts(max_attempts)
        .with_backoff(Backoff::new(backoff_base_ms, backoff_max_ms));

    info!(
        stream = %worker_config.stream_name,
        consumer_group = %worker_config.consumer_group,
        consumer_id = %worker_config.consumer_id,
        max_concurrent_jobs = %worker_config.max_concurrent_jobs,
        max_attempts = %worker_config.max_attempts,
        "Worker configuration loaded"
    );

    // Shutdown plumbing: flip the flag on signal, force-exit if the drain
    // overruns its budget
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);

        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        error!("Drain deadline exceeded, forcing exit");
        std::process::exit(1);
    });

    // Health and admin server
    let health_state = HealthState::new(
        redis.clone(),
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        jobs_stream,
        dlq_stream,
    )
    .with_admin_token(dlq_admin_token)
    .with_admin_allow_ips(dlq_allow_ips);

    let ready_state = health::ReadyState {
        db: db.clone(),
        redis: redis.clone(),
        runtime: runtime.clone(),
        blobs,
    };

    tokio::spawn(async move {
        if let Err(e) = health::serve(health_state, ready_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    // Run the claim loop until drained
    let worker = StreamWorker::<ExecutionJob, _>::new(redis, processor, worker_config)
        .with_circuit_breaker(CircuitBreaker::new(
            "execution",
            CircuitBreakerConfig::default(),
        ));

    worker
        .run(shutdown_rx)
        .await
        .map_err(|e| eyre::eyre!("Worker failed: {}", e))?;

    info!("Execution worker stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, draining"),
        _ = terminate => info!("Received SIGTERM, draining"),
    }
}
