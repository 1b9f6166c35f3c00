//! Secret resolution across tiers through the public API

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use radar_core::config::SecretsConfig;
use radar_core::secrets::{
    EnvSource, SecretResolver, SecretStore, SecretStoreError, SecretTier, VaultSecretStore,
};

use common::resolver;

/// KV store keyed by `path#key` that counts reads
#[derive(Debug, Default)]
struct KvStore {
    entries: HashMap<String, String>,
    reads: AtomicUsize,
}

impl KvStore {
    fn with(mut self, location: &str, value: &str) -> Self {
        self.entries.insert(location.to_string(), value.to_string());
        self
    }
}

#[async_trait]
impl SecretStore for KvStore {
    async fn read(&self, path: &str, key: &str) -> Result<Option<String>, SecretStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.get(&format!("{path}#{key}")).cloned())
    }

    fn name(&self) -> &str {
        "kv"
    }
}

#[tokio::test]
async fn test_unreachable_store_falls_back_to_environment_then_cache() {
    let store = VaultSecretStore::new(
        "http://127.0.0.1:9",
        "kv",
        "token",
        Duration::from_millis(200),
    )
    .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), &[("POSTGRES_PASSWORD", "abc")]).with_store(Arc::new(store));

    let first = resolver.resolve("POSTGRES_PASSWORD").await.unwrap();
    assert_eq!(first.value, "abc");
    assert_eq!(first.tier, SecretTier::Env);

    let second = resolver.resolve("POSTGRES_PASSWORD").await.unwrap();
    assert_eq!(second.value, "abc");
    assert_eq!(second.tier, SecretTier::Cache);
    assert_eq!(resolver.cached_tier("POSTGRES_PASSWORD"), Some(SecretTier::Env));
}

#[tokio::test]
async fn test_store_locations_follow_naming_rules() {
    let store = Arc::new(
        KvStore::default()
            .with("api-keys#openai", "sk-test")
            .with("nats#host", "queue")
            .with("database#url", "postgresql://vault:pw@db:5432/radar"),
    );
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), &[("OPENAI_API_KEY", "from-env")])
        .with_store(Arc::clone(&store) as Arc<dyn SecretStore>);

    assert_eq!(resolver.openai_api_key().await, "sk-test");
    assert_eq!(resolver.nats_url().await, "nats://queue:4222");
    assert_eq!(
        resolver.database_url().await,
        "postgresql://vault:pw@db:5432/radar"
    );
}

#[tokio::test]
async fn test_bypass_list_skips_the_store() {
    let store = Arc::new(KvStore::default().with("aws#access_key_id", "from-store"));
    let config = SecretsConfig {
        vault_bypass: vec!["AWS_ACCESS_KEY_ID".to_string()],
        ..SecretsConfig::default()
    };
    let dir = tempfile::tempdir().unwrap();
    let resolver = SecretResolver::new(&config)
        .with_env(EnvSource::fixed(HashMap::from([(
            "AWS_ACCESS_KEY_ID".to_string(),
            "from-env".to_string(),
        )])))
        .with_secrets_dir(dir.path())
        .with_store(Arc::clone(&store) as Arc<dyn SecretStore>);

    let secret = resolver.resolve("AWS_ACCESS_KEY_ID").await.unwrap();
    assert_eq!(secret.value, "from-env");
    assert_eq!(store.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_file_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let env_file = dir.path().join("api_token");
    std::fs::write(&env_file, "\u{feff}from-env-file\n").unwrap();
    std::fs::write(dir.path().join("newsapi_key"), "  mounted-key \n").unwrap();

    let resolver = resolver(dir.path(), &[("SERVICE_TOKEN_FILE", env_file.to_str().unwrap())]);

    let from_env_file = resolver.resolve("SERVICE_TOKEN").await.unwrap();
    assert_eq!(from_env_file.value, "from-env-file");
    assert_eq!(from_env_file.tier, SecretTier::EnvFile);

    let mounted = resolver.resolve("NEWSAPI_KEY").await.unwrap();
    assert_eq!(mounted.value, "mounted-key");
    assert_eq!(mounted.tier, SecretTier::MountedFile);
}

#[tokio::test]
async fn test_composites_use_defaults_when_nothing_is_set() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), &[]);

    assert_eq!(
        resolver.database_url().await,
        "postgresql://ai:ai_pwd@db:5432/ai_radar"
    );
    assert_eq!(resolver.nats_url().await, "nats://nats:4222");

    let object_store = resolver.object_store_config().await;
    assert_eq!(object_store.endpoint, "http://minio:9000");
    assert_eq!(object_store.bucket, "ai-radar-content");

    let linkedin = resolver.linkedin_config().await;
    assert!(linkedin.access_token.is_empty());
    assert_eq!(resolver.get("UNSET_SECRET", "fallback").await, "fallback");
    assert_eq!(resolver.cached_tier("UNSET_SECRET"), None);
}

#[tokio::test]
async fn test_mounted_secrets_come_only_from_the_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), &[]);

    assert_eq!(resolver.get("NEWSAPI_KEY", "unset").await, "unset");

    std::fs::write(dir.path().join("newsapi_key"), "mounted-key").unwrap();
    let mounted = resolver.resolve("NEWSAPI_KEY").await.unwrap();
    assert_eq!(mounted.value, "mounted-key");
    assert_eq!(mounted.tier, SecretTier::MountedFile);
}

#[tokio::test]
async fn test_disabled_store_tier_never_discovers_a_token() {
    let config = SecretsConfig {
        vault_enabled: false,
        ..SecretsConfig::default()
    };
    let resolver = SecretResolver::from_config(&config).await;
    assert!(!resolver.has_store());
}
