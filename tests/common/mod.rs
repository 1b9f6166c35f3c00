//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use radar_core::config::SecretsConfig;
use radar_core::messaging::{ConnectionManager, InMemoryBroker};
use radar_core::secrets::{EnvSource, SecretResolver};

pub const PRIMARY_URL: &str = "nats://primary:4222";
pub const BACKUP_URL: &str = "nats://backup:4222";

/// Connection manager over the in-memory broker with a primary and one backup
pub fn connection(broker: &InMemoryBroker) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        Some(PRIMARY_URL),
        &[BACKUP_URL.to_string()],
        Duration::from_secs(1),
        Arc::new(broker.clone()),
    ))
}

/// Resolver with no secret store, a fixed environment and mounted secrets read
/// from `secrets_dir` instead of the host's `/run/secrets`
pub fn resolver(secrets_dir: &Path, vars: &[(&str, &str)]) -> SecretResolver {
    let env = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<HashMap<_, _>>();
    SecretResolver::new(&SecretsConfig::default())
        .with_env(EnvSource::fixed(env))
        .with_secrets_dir(secrets_dir)
}

/// Poll `condition` until it holds, panicking after about a second
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
