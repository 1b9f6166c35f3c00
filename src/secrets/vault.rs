//! # Vault Secret Store
//!
//! Reads KV v2 secrets over HTTP (`GET {addr}/v1/{mount}/data/{path}`, value under
//! `data.data.<key>`).
//!
//! Token discovery, first match wins:
//! 1. token file written by a Vault agent (`vault_token_path`)
//! 2. `VAULT_TOKEN`
//! 3. the development token `root`, kept only if `auth/token/lookup-self` accepts it

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::resolver::EnvSource;
use crate::config::SecretsConfig;
use crate::constants::secrets::VAULT_DEV_TOKEN;

#[derive(Error, Debug)]
pub enum SecretStoreError {
    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("Secret store returned status {status} for {path}")]
    Status { status: u16, path: String },

    #[error("Unexpected response body: {message}")]
    Decode { message: String },

    #[error("Secret store configuration error: {message}")]
    Configuration { message: String },
}

impl SecretStoreError {
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for SecretStoreError {
    fn from(err: reqwest::Error) -> Self {
        Self::http(err.to_string())
    }
}

/// Structured secret store addressed by `(path, key)`
#[async_trait]
pub trait SecretStore: Send + Sync + fmt::Debug {
    /// `Ok(None)` when the path or key does not exist
    async fn read(&self, path: &str, key: &str) -> Result<Option<String>, SecretStoreError>;

    fn name(&self) -> &str;
}

pub struct VaultSecretStore {
    client: reqwest::Client,
    addr: String,
    mount: String,
    token: String,
}

impl fmt::Debug for VaultSecretStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSecretStore")
            .field("addr", &self.addr)
            .field("mount", &self.mount)
            .field("token", &"****")
            .finish()
    }
}

impl VaultSecretStore {
    pub fn new(
        addr: impl Into<String>,
        mount: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SecretStoreError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SecretStoreError::Configuration {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            addr: addr.into().trim_end_matches('/').to_string(),
            mount: mount.into().trim_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Find a usable token; `None` disables the secret store tier
    pub async fn discover(config: &SecretsConfig, env: &EnvSource) -> Option<Self> {
        let timeout = Duration::from_millis(config.vault_timeout_ms);
        let build = |token: String| {
            Self::new(&config.vault_addr, &config.vault_mount, token, timeout)
                .map_err(|e| warn!(error = %e, "Failed to initialize Vault client"))
                .ok()
        };

        if let Ok(contents) = tokio::fs::read_to_string(&config.vault_token_path).await {
            let token = contents.trim().to_string();
            if !token.is_empty() {
                info!(path = %config.vault_token_path, "Initialized Vault client with token file");
                return build(token);
            }
        }

        if let Some(token) = env.var("VAULT_TOKEN").filter(|t| !t.is_empty()) {
            info!("Initialized Vault client with token from environment");
            return build(token);
        }

        let store = build(VAULT_DEV_TOKEN.to_string())?;
        match store.lookup_self().await {
            Ok(true) => {
                info!(addr = %store.addr, "Initialized Vault client with development token");
                Some(store)
            }
            Ok(false) => {
                warn!(addr = %store.addr, "Development token rejected, secret store disabled");
                None
            }
            Err(e) => {
                warn!(
                    addr = %store.addr,
                    error = %e,
                    "No Vault token available, secret store disabled"
                );
                None
            }
        }
    }

    pub fn secret_url(&self, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.addr, self.mount, path.trim_matches('/'))
    }

    /// Whether the store accepts the current token
    pub async fn lookup_self(&self) -> Result<bool, SecretStoreError> {
        let response = self
            .client
            .get(format!("{}/v1/auth/token/lookup-self", self.addr))
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;
        Ok(response.status().is_success())
    }
}

/// Pull `data.data.<key>` out of a KV v2 read response
pub(crate) fn extract_kv2_value(body: &Value, key: &str) -> Option<String> {
    match body.get("data")?.get("data")?.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[async_trait]
impl SecretStore for VaultSecretStore {
    async fn read(&self, path: &str, key: &str) -> Result<Option<String>, SecretStoreError> {
        let url = self.secret_url(path);
        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(path, "Secret path not found");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(SecretStoreError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }

        let body: Value = response.json().await.map_err(|e| SecretStoreError::Decode {
            message: e.to_string(),
        })?;
        Ok(extract_kv2_value(&body, key))
    }

    fn name(&self) -> &str {
        "vault"
    }
}
