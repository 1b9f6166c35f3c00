#![allow(clippy::doc_markdown)] // Allow technical terms like JetStream, PostgreSQL in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # AI-Radar Core
//!
//! Durable task-queue orchestration layer shared by every AI-Radar agent.
//!
//! ## Overview
//!
//! The pipeline (`rss_fetch → article_fetch → summarize → rank → share`) is a chain of
//! independent agent processes that only talk to each other through a durable
//! JetStream stream. This crate owns everything those agents have in common:
//!
//! - broker connection management with an ordered failover list
//! - stream and durable-consumer reconciliation
//! - retry-wrapped publish and subscribe primitives
//! - subject based dispatch with at-least-once delivery and local dedup
//! - a layered secret resolver (cache, Vault, env, env-file, mounted file, default)
//! - a classification-aware retrying PostgreSQL client
//!
//! ## Module Organization
//!
//! - [`config`] - Layered configuration (defaults, TOML file, environment)
//! - [`secrets`] - Secret resolution and the Vault KV store
//! - [`messaging`] - Broker providers, connection, stream, consumer, publisher, router
//! - [`dedup`] - Per-process idempotency guard
//! - [`database`] - Retrying store client and SQLSTATE classification
//! - [`resilience`] - Reusable retry policy
//! - [`health`] - Readiness state and counters for external health endpoints
//! - [`agent`] - Explicit per-process context wiring all of the above
//! - [`scheduler`] - Periodic producer of `rss_fetch` tasks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use radar_core::agent::{AgentContext, StoreMode};
//! use radar_core::config::RadarConfig;
//! use radar_core::messaging::{handler_fn, TaskKind};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! radar_core::logging::init_tracing();
//!
//! let config = RadarConfig::load()?;
//! let context = AgentContext::bootstrap("fetcher", config, StoreMode::Required).await?;
//!
//! let mut router = context.router();
//! router.register(
//!     TaskKind::RssFetch,
//!     handler_fn(|payload, delivery| async move {
//!         tracing::info!(subject = %delivery.subject, %payload, "fetching feed");
//!         anyhow::Ok(())
//!     }),
//! )?;
//! router.start().await?;
//!
//! context.wait_for_shutdown_signal().await;
//! router.shutdown().await;
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod constants;
pub mod database;
pub mod dedup;
pub mod error;
pub mod health;
pub mod logging;
pub mod messaging;
pub mod resilience;
pub mod scheduler;
pub mod secrets;

pub use agent::{AgentContext, StoreMode};
pub use config::RadarConfig;
pub use dedup::{Claim, DedupGuard};
pub use error::{RadarError, RadarResult};
pub use health::{AgentHealth, HealthStatus};
pub use messaging::{
    ConnectionManager, ConsumerManager, MessagingError, Publisher, Router, StreamReconciler,
};
pub use secrets::SecretResolver;
