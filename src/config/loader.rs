//! Configuration Loader
//!
//! Layers, lowest priority first:
//!
//! 1. [`RadarConfig::default`]
//! 2. Optional TOML file (`RADAR_CONFIG_PATH`, default `config/radar.toml`)
//! 3. Nested environment variables, `RADAR__BROKER__SUBJECT_PREFIX=staging`
//! 4. Flat variables the agents' deployment already sets (`NATS_URL`, `VAULT_ADDR`, ...)

use std::collections::HashMap;
use std::path::PathBuf;

use config::{Config, Environment, File};
use tracing::debug;

use super::RadarConfig;
use crate::error::RadarResult;

const CONFIG_PATH_VAR: &str = "RADAR_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config/radar.toml";

/// Flat environment variable → config key
const LEGACY_OVERRIDES: &[(&str, &str)] = &[
    ("NATS_URL", "broker.url"),
    ("NATS_SUBJECT_PREFIX", "broker.subject_prefix"),
    ("NATS_STREAM_NAME", "broker.stream.name"),
    ("DATABASE_URL", "database.url"),
    ("POSTGRES_URL", "database.url"),
    ("VAULT_ADDR", "secrets.vault_addr"),
    ("VAULT_TOKEN_PATH", "secrets.vault_token_path"),
    ("VAULT_MOUNT", "secrets.vault_mount"),
    ("VAULT_ROLE", "secrets.vault_role"),
    ("SECRETS_DIR", "secrets.secrets_dir"),
    ("CRON_INTERVAL_SECS", "scheduler.interval_secs"),
];

#[derive(Debug, Default, Clone)]
pub struct ConfigLoader {
    /// Replaces the process environment when set
    env: Option<HashMap<String, String>>,
    file: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read variables from `env` instead of the process environment
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = Some(env);
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.env {
            Some(env) => env.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
        .filter(|v| !v.is_empty())
    }

    fn config_path(&self) -> PathBuf {
        self.file
            .clone()
            .or_else(|| self.var(CONFIG_PATH_VAR).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load(&self) -> RadarResult<RadarConfig> {
        let path = self.config_path();
        debug!(path = %path.display(), "Loading configuration");

        let mut builder = Config::builder()
            .add_source(Config::try_from(&RadarConfig::default())?)
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix("RADAR")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("broker.fallback_urls")
                    .with_list_parse_key("secrets.vault_bypass")
                    .source(self.env.clone()),
            );

        // later entries win, so POSTGRES_URL beats DATABASE_URL
        for (var, key) in LEGACY_OVERRIDES {
            if let Some(value) = self.var(var) {
                builder = builder.set_override(*key, value)?;
            }
        }

        let config: RadarConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            prefix = %config.broker.subject_prefix,
            stream = %config.broker.stream.name,
            vault_addr = %config.secrets.vault_addr,
            "Configuration loaded"
        );

        Ok(config)
    }
}
