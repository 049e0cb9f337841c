use axum::{middleware, routing::get, Router};
use blobstore::{BlobStore, FsBlobStore};
use core_config::tracing::{init_tracing, install_color_eyre};
use domain_submissions::{
    dlq_stream_name, jobs_stream_name, IntakeService, PgSubmissionRepository,
};
use eyre::WrapErr;
use ratelimit::RateLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use stream_worker::backpressure::LoadShedder;
use stream_worker::{HealthState, StreamProducer};
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod config;
mod openapi;
mod state;

use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    let config = Config::from_env().wrap_err("Failed to load gateway configuration")?;
    init_tracing(&config.environment);

    observability::init_metrics();

    // Backing stores come up concurrently, each with connection retry
    let postgres_future = async {
        database::postgres::connect_from_config_with_retry(config.database.clone(), None)
            .await
            .wrap_err("PostgreSQL connection failed")
    };
    let redis_future = async {
        database::redis::connect_from_config_with_retry(config.redis.clone(), None)
            .await
            .wrap_err("Redis connection failed")
    };
    let (db, redis) = tokio::try_join!(postgres_future, redis_future)?;

    database::postgres::run_migrations::<migration::Migrator>(&db, "crucible_gateway")
        .await
        .wrap_err("Database migration failed")?;

    let blobs = Arc::new(FsBlobStore::new(&config.blob_root));
    blobs
        .ping()
        .await
        .wrap_err("Blob store root is not writable")?;

    let jobs_stream = jobs_stream_name(&config.pool_name);
    let producer = StreamProducer::new(redis.clone(), jobs_stream.clone());
    let rate_limiter = RateLimiter::new(redis.clone(), config.rate_limits);
    let shedder = Arc::new(LoadShedder::new(config.shed_threshold, config.shed_recovery));

    let repository = Arc::new(PgSubmissionRepository::new(db.clone()));
    let intake = Arc::new(
        IntakeService::new(
            repository,
            blobs.clone(),
            Arc::new(producer.clone()),
            Arc::new(rate_limiter),
        )
        .with_load_shedder(shedder.clone()),
    );

    let state = AppState {
        config: config.clone(),
        db,
        redis: redis.clone(),
        blobs,
        intake,
        shedder: shedder.clone(),
    };

    spawn_depth_sampler(producer, shedder, config.depth_poll_interval_ms, jobs_stream.clone());

    // Admin and monitoring endpoints share the stream-worker health state
    let health_state = HealthState::new(
        redis,
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        jobs_stream,
        dlq_stream_name(&config.pool_name),
    )
    .with_admin_token(config.dlq_admin_token.clone())
    .with_admin_allow_ips(config.dlq_allow_ips.clone());

    let app = Router::new()
        .merge(api::routes(state.clone()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(middleware::from_fn(
            observability::middleware::metrics_middleware,
        ))
        .merge(api::health::router(state.clone()))
        .merge(stream_worker::admin_router(health_state))
        .route("/metrics", get(observability::metrics_handler));

    let listener = tokio::net::TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind {}", config.server.address()))?;

    info!(address = %config.server.address(), "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .wrap_err("Server error")?;

    info!("Gateway shutdown complete");
    Ok(())
}

/// Feed the load shedder and queue-depth gauge from the stream length.
fn spawn_depth_sampler(
    producer: StreamProducer,
    shedder: Arc<LoadShedder>,
    interval_ms: u64,
    stream_name: String,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(100)));
        loop {
            ticker.tick().await;
            match producer.stream_length().await {
                Ok(depth) => {
                    shedder.observe_depth(depth as u64);
                    stream_worker::metrics::set_queue_depth(&stream_name, depth as f64);
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Queue depth sample failed");
                }
            }
        }
    });
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
