use crate::config::Config;
use blobstore::FsBlobStore;
use domain_submissions::{IntakeService, PgSubmissionRepository};
use redis::aio::ConnectionManager;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use stream_worker::backpressure::LoadShedder;

/// Shared application state for the gateway handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub db: DatabaseConnection,
    pub redis: ConnectionManager,
    pub blobs: Arc<FsBlobStore>,
    pub intake: Arc<IntakeService<PgSubmissionRepository>>,
    pub shedder: Arc<LoadShedder>,
}
