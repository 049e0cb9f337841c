use core_config::{env_or_default, env_parse_or, server::ServerConfig, ConfigError, Environment, FromEnv};
use database::postgres::PostgresConfig;
use database::redis::RedisConfig;
use ratelimit::RateLimitConfig;
use std::path::PathBuf;

/// Gateway configuration, loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: PostgresConfig,
    pub redis: RedisConfig,
    pub rate_limits: RateLimitConfig,
    /// Root directory of the filesystem blob store.
    pub blob_root: PathBuf,
    /// Worker pool whose stream this gateway feeds.
    pub pool_name: String,
    /// Queue depth at which low-priority shedding starts.
    pub shed_threshold: u64,
    /// Queue depth at which acceptance fully resumes.
    pub shed_recovery: u64,
    /// Interval for the queue-depth sampler.
    pub depth_poll_interval_ms: u64,
    /// Shared secret for `/admin/dlq`; admin routes are disabled when
    /// unset.
    pub dlq_admin_token: Option<String>,
    /// Client IPs allowed on admin routes (comma-separated env value).
    pub dlq_allow_ips: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?;
        let database = PostgresConfig::from_env()?;
        let redis = RedisConfig::from_env()?;
        let rate_limits = RateLimitConfig::from_env()?;

        let blob_root = PathBuf::from(env_or_default("BLOB_STORE_ROOT", "/var/lib/crucible/blobs"));
        let pool_name = env_or_default("POOL_NAME", "container");
        let shed_threshold = env_parse_or("QUEUE_DEPTH_THRESHOLD", 1000)?;
        let shed_recovery = env_parse_or("QUEUE_DEPTH_RECOVERY", 500)?;
        let depth_poll_interval_ms = env_parse_or("POLL_INTERVAL_MS", 1000)?;

        let dlq_admin_token = std::env::var("DLQ_ADMIN_TOKEN").ok().filter(|t| !t.is_empty());
        let dlq_allow_ips = std::env::var("DLQ_ALLOW_IPS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            environment,
            server,
            database,
            redis,
            rate_limits,
            blob_root,
            pool_name,
            shed_threshold,
            shed_recovery,
            depth_poll_interval_ms,
            dlq_admin_token,
            dlq_allow_ips,
        })
    }
}
