//! # Secret Resolver
//!
//! Layered lookup, first hit wins and is cached for the life of the process:
//!
//! 1. process-local cache
//! 2. secret store, at the location given by [`vault_location`]
//! 3. environment variable `<NAME>`
//! 4. file named by environment variable `<NAME>_FILE`
//! 5. mounted secret file `<secrets_dir>/<name lowercased>`
//! 6. the caller's default (never cached)
//!
//! A failing tier is logged at `debug`/`warn` and skipped; resolution never errors.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, warn};

use super::naming::vault_location;
use super::vault::{SecretStore, VaultSecretStore};
use crate::config::SecretsConfig;

/// Where environment variables come from
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    #[default]
    Process,
    Fixed(HashMap<String, String>),
}

impl EnvSource {
    pub fn fixed(vars: HashMap<String, String>) -> Self {
        Self::Fixed(vars)
    }

    pub fn var(&self, name: &str) -> Option<String> {
        match self {
            Self::Process => std::env::var(name).ok(),
            Self::Fixed(vars) => vars.get(name).cloned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretTier {
    Cache,
    Vault,
    Env,
    EnvFile,
    MountedFile,
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecret {
    pub value: String,
    pub tier: SecretTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedInConfig {
    pub access_token: String,
    pub author_urn: String,
}

#[derive(Debug)]
pub struct SecretResolver {
    store: Option<Arc<dyn SecretStore>>,
    env: EnvSource,
    secrets_dir: PathBuf,
    bypass: HashSet<String>,
    /// Resolved value with the tier it originally came from
    cache: DashMap<String, ResolvedSecret>,
}

/// Read a secret file: UTF-8, byte-order mark stripped, surrounding whitespace trimmed
async fn read_secret_file(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Some(text.trim_start_matches('\u{feff}').trim().to_string()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Secret file is not valid UTF-8");
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read secret file");
            None
        }
    }
}

impl SecretResolver {
    /// Resolver without a secret store; see [`SecretResolver::from_config`]
    pub fn new(config: &SecretsConfig) -> Self {
        Self {
            store: None,
            env: EnvSource::Process,
            secrets_dir: PathBuf::from(&config.secrets_dir),
            bypass: config.vault_bypass.iter().cloned().collect(),
            cache: DashMap::new(),
        }
    }

    /// Build from configuration, discovering a Vault token when enabled
    pub async fn from_config(config: &SecretsConfig) -> Self {
        let resolver = Self::new(config);
        if !config.vault_enabled {
            debug!("Secret store tier disabled by configuration");
            return resolver;
        }
        match VaultSecretStore::discover(config, &resolver.env).await {
            Some(store) => resolver.with_store(Arc::new(store)),
            None => resolver,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    pub fn with_secrets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.secrets_dir = dir.into();
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Value from the highest-priority tier that has one, else `default`
    pub async fn get(&self, name: &str, default: &str) -> String {
        match self.resolve(name).await {
            Some(secret) => secret.value,
            None => default.to_string(),
        }
    }

    pub async fn get_optional(&self, name: &str) -> Option<String> {
        self.resolve(name).await.map(|s| s.value)
    }

    /// Walk the tiers; a cache hit is reported as [`SecretTier::Cache`]
    pub async fn resolve(&self, name: &str) -> Option<ResolvedSecret> {
        if let Some(hit) = self.cache.get(name) {
            return Some(ResolvedSecret {
                value: hit.value.clone(),
                tier: SecretTier::Cache,
            });
        }

        let (value, tier) = self.lookup(name).await?;
        debug!(secret = name, tier = ?tier, "Resolved secret");
        self.cache.insert(
            name.to_string(),
            ResolvedSecret {
                value: value.clone(),
                tier,
            },
        );
        Some(ResolvedSecret { value, tier })
    }

    /// Tier a cached secret was first resolved from
    pub fn cached_tier(&self, name: &str) -> Option<SecretTier> {
        self.cache.get(name).map(|hit| hit.tier)
    }

    async fn lookup(&self, name: &str) -> Option<(String, SecretTier)> {
        if !self.bypass.contains(name) {
            if let Some(value) = self.read_store(name).await {
                return Some((value, SecretTier::Vault));
            }
        }

        if let Some(value) = self.env.var(name) {
            return Some((value, SecretTier::Env));
        }

        if let Some(path) = self.env.var(&format!("{name}_FILE")) {
            if let Some(value) = read_secret_file(Path::new(&path)).await {
                return Some((value, SecretTier::EnvFile));
            }
        }

        let mounted = self.secrets_dir.join(name.to_lowercase());
        read_secret_file(&mounted)
            .await
            .map(|value| (value, SecretTier::MountedFile))
    }

    async fn read_store(&self, name: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        let location = vault_location(name)?;
        self.read_location(store.as_ref(), &location.path, &location.key)
            .await
    }

    async fn read_location(&self, store: &dyn SecretStore, path: &str, key: &str) -> Option<String> {
        match store.read(path, key).await {
            Ok(value) => value,
            Err(e) => {
                debug!(store = store.name(), path, key, error = %e, "Secret store read failed");
                None
            }
        }
    }

    /// `database#url` from the store, else assembled from `POSTGRES_*` parts
    pub async fn database_url(&self) -> String {
        if let Some(store) = &self.store {
            if let Some(url) = self.read_location(store.as_ref(), "database", "url").await {
                if !url.is_empty() {
                    return url;
                }
            }
        }

        let host = self.get("POSTGRES_HOST", "db").await;
        let port = self.get("POSTGRES_PORT", "5432").await;
        let user = self.get("POSTGRES_USER", "ai").await;
        let password = self.get("POSTGRES_PASSWORD", "ai_pwd").await;
        let db = self.get("POSTGRES_DB", "ai_radar").await;
        format!("postgresql://{user}:{password}@{host}:{port}/{db}")
    }

    pub async fn nats_url(&self) -> String {
        let host = self.get("NATS_HOST", "nats").await;
        let port = self.get("NATS_PORT", "4222").await;
        format!("nats://{host}:{port}")
    }

    pub async fn object_store_config(&self) -> ObjectStoreConfig {
        ObjectStoreConfig {
            endpoint: self.get("MINIO_ENDPOINT", "http://minio:9000").await,
            access_key: self.get("AWS_ACCESS_KEY_ID", "minio").await,
            secret_key: self.get("AWS_SECRET_ACCESS_KEY", "minio_pwd").await,
            bucket: self.get("BUCKET_NAME", "ai-radar-content").await,
        }
    }

    pub async fn openai_api_key(&self) -> String {
        self.get("OPENAI_API_KEY", "").await
    }

    pub async fn newsapi_key(&self) -> String {
        self.get("NEWSAPI_KEY", "").await
    }

    pub async fn linkedin_config(&self) -> LinkedInConfig {
        LinkedInConfig {
            access_token: self.get("LINKEDIN_ACCESS_TOKEN", "").await,
            author_urn: self.get("LINKEDIN_AUTHOR_URN", "").await,
        }
    }
}
