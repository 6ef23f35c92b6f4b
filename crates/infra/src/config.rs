//! Configuration loading and representation.
//!
//! All settings come from environment variables, optionally seeded from a
//! `.env` file.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `HTTP_ADDR` | `0.0.0.0:3000` |
//! | `JWT_SECRET` | development secret (warns) |
//! | `JWT_TTL_SECS` | `3600` |
//! | `DATABASE_URL` | unset: in-memory stores |
//! | `DATABASE_MAX_CONNECTIONS` | `5` |
//! | `REDIS_URL` | unset: in-memory queue |
//! | `REDIS_CONNECT_TIMEOUT_MS` | `5000` |
//! | `LOG_QUEUE_NAME` | `logs` |
//! | `LOG_JOB_ATTEMPTS` | `2` |
//! | `LOG_JOB_BACKOFF_MS` | `5000` |
//! | `ENQUEUE_TIMEOUT_MS` | `2000` |
//! | `WORKER_ENABLED` | `true` |
//! | `WORKER_CONCURRENCY` | `4` |
//! | `WORKER_POLL_INTERVAL_MS` | `200` |
//! | `JOB_LEASE_SECS` | `30` |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::jobs::WorkerConfig;

const DEV_JWT_SECRET: &str = "clientdesk-dev-secret-change-me";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Whole-application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_addr: SocketAddr,
    pub jwt: JwtConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub log_queue: LogQueueConfig,
    pub worker: WorkerSettings,
}

#[derive(Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub ttl: Duration,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub connect_timeout: Duration,
}

/// Settings for the log queue and its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQueueConfig {
    pub name: String,
    /// Total attempts per log job
    pub attempts: u32,
    /// Fixed delay between attempts
    pub backoff: Duration,
    /// Bound on a single enqueue call
    pub enqueue_timeout: Duration,
}

impl Default for LogQueueConfig {
    fn default() -> Self {
        Self {
            name: "logs".to_string(),
            attempts: 2,
            backoff: Duration::from_millis(5_000),
            enqueue_timeout: Duration::from_millis(2_000),
        }
    }
}

/// Settings for queue workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Run a worker inside the API process
    pub enabled: bool,
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: 4,
            poll_interval: Duration::from_millis(200),
            lease: Duration::from_secs(30),
        }
    }
}

impl WorkerSettings {
    pub fn worker_config(&self, queue: &str) -> WorkerConfig {
        WorkerConfig::for_queue(queue)
            .with_name(format!("{queue}-worker"))
            .with_concurrency(self.concurrency)
            .with_poll_interval(self.poll_interval)
            .with_lease(self.lease)
    }
}

impl AppConfig {
    /// Load from the process environment (after reading `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET is not set, using the development secret");
                DEV_JWT_SECRET.to_string()
            }
        };

        let database = get("DATABASE_URL")
            .map(|url| {
                Ok::<_, ConfigError>(DatabaseConfig {
                    url,
                    max_connections: parse(&get, "DATABASE_MAX_CONNECTIONS", 5)?,
                })
            })
            .transpose()?;

        let redis = get("REDIS_URL")
            .map(|url| {
                Ok::<_, ConfigError>(RedisConfig {
                    url,
                    connect_timeout: Duration::from_millis(parse(&get, "REDIS_CONNECT_TIMEOUT_MS", 5_000)?),
                })
            })
            .transpose()?;

        let defaults = LogQueueConfig::default();
        let log_queue = LogQueueConfig {
            name: get("LOG_QUEUE_NAME").unwrap_or(defaults.name),
            attempts: parse::<u32>(&get, "LOG_JOB_ATTEMPTS", defaults.attempts)?.max(1),
            backoff: Duration::from_millis(parse(&get, "LOG_JOB_BACKOFF_MS", 5_000)?),
            enqueue_timeout: Duration::from_millis(parse(&get, "ENQUEUE_TIMEOUT_MS", 2_000)?),
        };

        let worker = WorkerSettings {
            enabled: parse_bool(&get, "WORKER_ENABLED", true)?,
            concurrency: parse::<usize>(&get, "WORKER_CONCURRENCY", 4)?.max(1),
            poll_interval: Duration::from_millis(parse(&get, "WORKER_POLL_INTERVAL_MS", 200)?),
            lease: Duration::from_secs(parse::<u64>(&get, "JOB_LEASE_SECS", 30)?.max(1)),
        };

        Ok(Self {
            http_addr: parse(&get, "HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            jwt: JwtConfig {
                secret,
                ttl: Duration::from_secs(parse(&get, "JWT_TTL_SECS", 3_600)?),
            },
            database,
            redis,
            log_queue,
            worker,
        })
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(value) => Err(ConfigError::Invalid { key, value }),
    }
}
