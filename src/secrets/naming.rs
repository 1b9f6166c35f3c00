//! Flat secret names to secret-store locations.
//!
//! | Name                                | Path       | Key                              |
//! |-------------------------------------|------------|----------------------------------|
//! | `POSTGRES_*`, `DB_*`                | `database` | remainder, lowercased            |
//! | `NATS_*`                            | `nats`     | remainder, lowercased            |
//! | `MINIO_*`                           | `minio`    | remainder, lowercased            |
//! | `*_KEY`, `*_API_KEY`, `*_TOKEN`     | `api-keys` | name without the suffix          |
//! | `SERVICE_REST`                      | `service`  | `rest`                           |
//!
//! Names without an underscore have no location.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VaultLocation {
    pub path: String,
    pub key: String,
}

impl VaultLocation {
    fn new(path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for VaultLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.key)
    }
}

pub fn vault_location(name: &str) -> Option<VaultLocation> {
    if name.starts_with("POSTGRES_") || name.starts_with("DB_") {
        let key = name.replace("POSTGRES_", "").replace("DB_", "");
        return Some(VaultLocation::new("database", key.to_lowercase()));
    }
    if name.starts_with("NATS_") {
        return Some(VaultLocation::new("nats", name.replace("NATS_", "").to_lowercase()));
    }
    if name.starts_with("MINIO_") {
        return Some(VaultLocation::new("minio", name.replace("MINIO_", "").to_lowercase()));
    }
    if name.ends_with("_KEY") || name.ends_with("_API_KEY") || name.ends_with("_TOKEN") {
        let key = name
            .to_lowercase()
            .replace("_api_key", "")
            .replace("_key", "")
            .replace("_token", "");
        return Some(VaultLocation::new("api-keys", key));
    }

    let lower = name.to_lowercase();
    let (path, key) = lower.split_once('_')?;
    Some(VaultLocation::new(path, key))
}
