//! # Secrets
//!
//! Credential and endpoint lookup shared by every component.

pub mod naming;
pub mod resolver;
pub mod vault;

pub use naming::{vault_location, VaultLocation};
pub use resolver::{
    EnvSource, LinkedInConfig, ObjectStoreConfig, ResolvedSecret, SecretResolver, SecretTier,
};
pub use vault::{SecretStore, SecretStoreError, VaultSecretStore};
