//! Connectors and utilities for the platform's backing stores.
//!
//! Two stores are covered: PostgreSQL (submission records, via SeaORM) and
//! Redis (job streams, rate-limit buckets). Both connectors retry startup
//! connections with exponential backoff, since the databases regularly come
//! up after the services in containerized deployments.
//!
//! # Features
//!
//! - `postgres` (default) - PostgreSQL support with SeaORM
//! - `redis` (default) - Redis support
//! - `config` - `FromEnv` loading for the config structs

pub mod common;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis;

pub use common::{DatabaseError, DatabaseResult};
