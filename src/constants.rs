//! # System Constants
//!
//! Defaults shared by configuration, the secret resolver and the broker layer.
//! Every value here can be overridden through [`crate::config::RadarConfig`].

/// Default subject namespace (`<prefix>.tasks.<kind>`)
pub const DEFAULT_SUBJECT_PREFIX: &str = "ai-radar";

/// Default durable stream name
pub const DEFAULT_STREAM_NAME: &str = "ai-radar";

/// Default maximum number of messages retained by the stream
pub const DEFAULT_STREAM_MAX_MESSAGES: i64 = 100_000;

/// Redeliveries allowed before the broker parks a message
pub const DEFAULT_MAX_DELIVER: i64 = 3;

/// Broker URLs tried after the configured primary, in order
pub const FALLBACK_BROKER_URLS: [&str; 3] = [
    "nats://nats:4222",
    "nats://localhost:4222",
    "nats://host.docker.internal:4222",
];

/// Per-URL connect timeout
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Upper bound for `scheduler.stale_after_days`
pub const MAX_STALE_AFTER_DAYS: i64 = 36_500;

/// Secret store defaults
pub mod secrets {
    pub const VAULT_ADDR: &str = "http://vault:8200";
    pub const VAULT_TOKEN_PATH: &str = "/vault/token";
    pub const VAULT_MOUNT: &str = "ai-radar";
    pub const VAULT_ROLE: &str = "ai-radar";
    pub const VAULT_TIMEOUT_MS: u64 = 5_000;

    /// Development token tried last, only accepted if the store confirms it
    pub const VAULT_DEV_TOKEN: &str = "root";

    /// Directory holding compose/orchestrator mounted secret files
    pub const SECRETS_DIR: &str = "/run/secrets";

    /// Secrets that never go through the secret store
    pub const VAULT_BYPASS: [&str; 1] = ["MINIO_ENDPOINT"];
}

/// Durable consumer names, one per worker role
pub mod consumers {
    pub const FETCHER_RSS: &str = "fetcher-rss";
    pub const FETCHER_ARTICLE: &str = "fetcher-article";
    pub const SUMMARISER: &str = "summariser";
    pub const RANKER: &str = "ranker";
    pub const SHARER: &str = "sharer";
}

/// Environment variable selecting the runtime environment (test, development, production)
pub const ENVIRONMENT_VAR: &str = "RADAR_ENV";
