//! # Configuration
//!
//! Typed configuration for one agent process. Defaults are safe for local
//! development (docker-compose hostnames); see [`loader::ConfigLoader`] for how files
//! and environment variables are layered on top.

pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::constants::{self, secrets};
use crate::error::{RadarError, RadarResult};
use crate::messaging::service::{RetentionPolicy, StorageClass, StreamDescriptor};
use crate::resilience::RetryPolicy;

pub use loader::ConfigLoader;

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RadarConfig {
    pub agent: AgentConfig,
    pub broker: BrokerConfig,
    pub database: DatabaseConfig,
    pub secrets: SecretsConfig,
    pub retry: RetryConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent name used in logs
    pub name: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "agent".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Primary broker URL; when unset the secret resolver builds one from `NATS_HOST`/`NATS_PORT`
    pub url: Option<String>,
    pub fallback_urls: Vec<String>,
    pub connect_timeout_ms: u64,
    pub subject_prefix: String,
    /// Deliveries per message before the broker parks it
    pub max_deliver: i64,
    pub stream: StreamConfig,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: None,
            fallback_urls: constants::FALLBACK_BROKER_URLS
                .iter()
                .map(|u| u.to_string())
                .collect(),
            connect_timeout_ms: constants::DEFAULT_CONNECT_TIMEOUT_MS,
            subject_prefix: constants::DEFAULT_SUBJECT_PREFIX.to_string(),
            max_deliver: constants::DEFAULT_MAX_DELIVER,
            stream: StreamConfig::default(),
        }
    }
}

impl BrokerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Desired stream: subjects are always `[<prefix>.>]`
    pub fn stream_descriptor(&self) -> StreamDescriptor {
        StreamDescriptor::for_prefix(&self.stream.name, &self.subject_prefix)
            .with_retention(self.stream.retention)
            .with_storage(self.stream.storage)
            .with_replicas(self.stream.replicas)
            .with_max_messages(self.stream.max_messages)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub name: String,
    pub retention: RetentionPolicy,
    pub storage: StorageClass,
    pub replicas: usize,
    pub max_messages: i64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: constants::DEFAULT_STREAM_NAME.to_string(),
            retention: RetentionPolicy::WorkQueue,
            storage: StorageClass::File,
            replicas: 1,
            max_messages: constants::DEFAULT_STREAM_MAX_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Full connection string; when unset the secret resolver composes one
    pub url: Option<String>,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout_seconds: 10,
            idle_timeout_seconds: 300,
            max_lifetime_seconds: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Disable to skip the secret store tier entirely (tests, offline development)
    pub vault_enabled: bool,
    pub vault_addr: String,
    pub vault_token_path: String,
    pub vault_mount: String,
    pub vault_role: String,
    pub vault_timeout_ms: u64,
    pub vault_bypass: Vec<String>,
    pub secrets_dir: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            vault_enabled: true,
            vault_addr: secrets::VAULT_ADDR.to_string(),
            vault_token_path: secrets::VAULT_TOKEN_PATH.to_string(),
            vault_mount: secrets::VAULT_MOUNT.to_string(),
            vault_role: secrets::VAULT_ROLE.to_string(),
            vault_timeout_ms: secrets::VAULT_TIMEOUT_MS,
            vault_bypass: secrets::VAULT_BYPASS.iter().map(|s| s.to_string()).collect(),
            secrets_dir: secrets::SECRETS_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub connect: RetryPolicy,
    pub publish: RetryPolicy,
    pub subscribe: RetryPolicy,
    pub store: RetryPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connect: RetryPolicy::for_connect(),
            publish: RetryPolicy::for_publish(),
            subscribe: RetryPolicy::for_subscribe(),
            store: RetryPolicy::for_store(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between scheduling passes; the first pass runs immediately
    pub interval_secs: u64,
    /// Pause between two sources within one pass
    pub source_pacing_ms: u64,
    /// Sources not fetched for this many days are deactivated
    pub stale_after_days: i64,
    pub stale_check_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30 * 60,
            source_pacing_ms: 1_000,
            stale_after_days: 7,
            stale_check_interval_secs: 24 * 60 * 60,
        }
    }
}

impl RadarConfig {
    /// Load from the default sources (file + process environment)
    pub fn load() -> RadarResult<Self> {
        ConfigLoader::new().load()
    }

    pub fn validate(&self) -> RadarResult<()> {
        if self.broker.subject_prefix.trim().is_empty() {
            return Err(RadarError::configuration("broker.subject_prefix must not be empty"));
        }
        if self.broker.stream.name.trim().is_empty() {
            return Err(RadarError::configuration("broker.stream.name must not be empty"));
        }
        if self.broker.max_deliver <= 0 {
            return Err(RadarError::configuration("broker.max_deliver must be greater than 0"));
        }
        if self.broker.connect_timeout_ms == 0 {
            return Err(RadarError::configuration(
                "broker.connect_timeout_ms must be greater than 0",
            ));
        }

        let pool = &self.database.pool;
        if pool.max_connections == 0 {
            return Err(RadarError::configuration(
                "database.pool.max_connections must be greater than 0",
            ));
        }
        if pool.min_connections > pool.max_connections {
            return Err(RadarError::configuration(format!(
                "database.pool.min_connections ({}) exceeds max_connections ({})",
                pool.min_connections, pool.max_connections
            )));
        }

        for (name, policy) in [
            ("connect", &self.retry.connect),
            ("publish", &self.retry.publish),
            ("subscribe", &self.retry.subscribe),
            ("store", &self.retry.store),
        ] {
            policy
                .validate()
                .map_err(|e| RadarError::configuration(format!("retry.{name}: {e}")))?;
        }

        let scheduler = &self.scheduler;
        if scheduler.interval_secs == 0 {
            return Err(RadarError::configuration(
                "scheduler.interval_secs must be greater than 0",
            ));
        }
        if scheduler.stale_check_interval_secs == 0 {
            return Err(RadarError::configuration(
                "scheduler.stale_check_interval_secs must be greater than 0",
            ));
        }
        if !(1..=constants::MAX_STALE_AFTER_DAYS).contains(&scheduler.stale_after_days) {
            return Err(RadarError::configuration(format!(
                "scheduler.stale_after_days must be between 1 and {}, got {}",
                constants::MAX_STALE_AFTER_DAYS,
                scheduler.stale_after_days
            )));
        }

        Ok(())
    }
}
