//! Worker configuration.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Stream consumer a worker process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    /// Change feed to contribution queue
    Relay,
    /// Contribution queue to aggregate store
    Updater,
}

impl WorkerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Relay => "relay",
            WorkerRole::Updater => "updater",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "relay" => Ok(WorkerRole::Relay),
            "updater" => Ok(WorkerRole::Updater),
            other => Err(WorkerError::config_error(format!("unknown worker role '{}'", other))),
        }
    }
}

/// How the updater persists an aggregate bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Read, compute, full-record upsert. Concurrent writers can lose updates.
    Overwrite,
    /// Write guarded by the version that was read, retried on conflict.
    #[default]
    Conditional,
}

impl FromStr for WriteMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overwrite" => Ok(WriteMode::Overwrite),
            "conditional" => Ok(WriteMode::Conditional),
            other => Err(WorkerError::config_error(format!("unknown write mode '{}'", other))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Consumers to run in this process
    pub roles: Vec<WorkerRole>,
    /// Maximum messages handed to one batch
    pub batch_size: usize,
    /// Maximum batches in flight per consumer
    pub max_concurrent_batches: usize,
    /// How often pending messages of dead consumers are reclaimed
    pub claim_interval: Duration,
    /// Minimum idle time before a pending message can be reclaimed
    pub claim_min_idle: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    pub write_mode: WriteMode,
    /// Reload-and-retry rounds after a version conflict
    pub max_conflict_retries: u32,
    /// Backoff unit between conflict retries, multiplied by the attempt
    pub conflict_backoff: Duration,
    /// Prometheus exporter listen address
    pub metrics_addr: SocketAddr,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            roles: vec![WorkerRole::Relay, WorkerRole::Updater],
            batch_size: 10,
            max_concurrent_batches: 4,
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
            write_mode: WriteMode::Conditional,
            max_conflict_retries: 5,
            conflict_backoff: Duration::from_millis(20),
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9100)),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let roles = match std::env::var("WORKER_ROLES") {
            Ok(value) => parse_roles(&value)?,
            Err(_) => defaults.roles,
        };

        let write_mode = match std::env::var("AGGREGATE_WRITE_MODE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.write_mode,
        };

        let metrics_addr = match std::env::var("METRICS_ADDR") {
            Ok(value) => value
                .parse()
                .map_err(|e| WorkerError::config_error(format!("METRICS_ADDR '{}': {}", value, e)))?,
            Err(_) => defaults.metrics_addr,
        };

        Ok(Self {
            roles,
            batch_size: std::env::var("WORKER_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.batch_size),
            max_concurrent_batches: std::env::var("WORKER_MAX_CONCURRENT_BATCHES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_batches),
            claim_interval: std::env::var("WORKER_CLAIM_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_interval),
            claim_min_idle: std::env::var("WORKER_CLAIM_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            shutdown_timeout: std::env::var("WORKER_SHUTDOWN_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            write_mode,
            max_conflict_retries: std::env::var("AGGREGATE_MAX_CONFLICT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_conflict_retries),
            conflict_backoff: std::env::var("AGGREGATE_CONFLICT_BACKOFF_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.conflict_backoff),
            metrics_addr,
        })
    }

    pub fn runs(&self, role: WorkerRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Comma-separated role list, duplicates removed. Must name at least one role.
fn parse_roles(value: &str) -> WorkerResult<Vec<WorkerRole>> {
    let mut roles = Vec::new();
    for part in value.split(',').filter(|p| !p.trim().is_empty()) {
        let role: WorkerRole = part.parse()?;
        if !roles.contains(&role) {
            roles.push(role);
        }
    }
    if roles.is_empty() {
        return Err(WorkerError::config_error("WORKER_ROLES names no role"));
    }
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "WORKER_ROLES",
        "WORKER_BATCH_SIZE",
        "AGGREGATE_WRITE_MODE",
        "AGGREGATE_MAX_CONFLICT_RETRIES",
        "METRICS_ADDR",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!(
            parse_roles("relay, updater,relay").unwrap(),
            vec![WorkerRole::Relay, WorkerRole::Updater]
        );
        assert_eq!(parse_roles("UPDATER").unwrap(), vec![WorkerRole::Updater]);
        assert!(parse_roles("relay,indexer").is_err());
        assert!(parse_roles(" , ").is_err());
    }

    #[test]
    fn test_write_mode_from_str() {
        assert_eq!("overwrite".parse::<WriteMode>().unwrap(), WriteMode::Overwrite);
        assert_eq!("Conditional".parse::<WriteMode>().unwrap(), WriteMode::Conditional);
        assert!("transactional".parse::<WriteMode>().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        let config = WorkerConfig::from_env().unwrap();

        assert!(config.runs(WorkerRole::Relay));
        assert!(config.runs(WorkerRole::Updater));
        assert_eq!(config.write_mode, WriteMode::Conditional);
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.metrics_addr.port(), 9100);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        std::env::set_var("WORKER_ROLES", "updater");
        std::env::set_var("WORKER_BATCH_SIZE", "0");
        std::env::set_var("AGGREGATE_WRITE_MODE", "overwrite");
        std::env::set_var("AGGREGATE_MAX_CONFLICT_RETRIES", "2");

        let config = WorkerConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.roles, vec![WorkerRole::Updater]);
        assert_eq!(config.batch_size, WorkerConfig::default().batch_size);
        assert_eq!(config.write_mode, WriteMode::Overwrite);
        assert_eq!(config.max_conflict_retries, 2);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_metrics_addr() {
        clear_env();
        std::env::set_var("METRICS_ADDR", "not-an-address");
        let result = WorkerConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(WorkerError::ConfigError(_))));
    }
}
