//! # Agent Context
//!
//! The explicit per-process container every agent builds once at startup and hands
//! to its components. Nothing in this crate keeps broker, store, or secret clients
//! in process-wide statics.
//!
//! Bootstrap order:
//! 1. validate configuration
//! 2. broker connect over the failover list, retried; exhaustion aborts startup
//! 3. stream reconciliation; any broker error aborts startup
//! 4. optional store connect; authentication or missing database aborts startup
//! 5. mark ready

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::RadarConfig;
use crate::database::RetryingStoreClient;
use crate::dedup::DedupGuard;
use crate::error::{RadarError, RadarResult};
use crate::health::AgentHealth;
use crate::messaging::{
    BrokerConnector, ConnectionManager, ConsumerManager, NatsConnector, Publisher, ReconcileOutcome,
    Router, StreamReconciler,
};
use crate::secrets::SecretResolver;

/// Whether the agent needs the relational store
#[derive(Debug, Clone)]
pub enum StoreMode {
    /// Connect at bootstrap; failure aborts startup
    Required,
    Disabled,
    /// Reuse an already connected client
    Existing(RetryingStoreClient),
}

#[derive(Debug)]
pub struct AgentContext {
    name: String,
    instance_id: Uuid,
    config: RadarConfig,
    secrets: Arc<SecretResolver>,
    connection: Arc<ConnectionManager>,
    consumers: Arc<ConsumerManager>,
    publisher: Arc<Publisher>,
    store: Option<RetryingStoreClient>,
    dedup: Arc<DedupGuard>,
    health: Arc<AgentHealth>,
    shutdown: watch::Sender<bool>,
}

impl AgentContext {
    /// Bootstrap against NATS, discovering the secret store from configuration
    pub async fn bootstrap(
        name: &str,
        config: RadarConfig,
        store_mode: StoreMode,
    ) -> RadarResult<Self> {
        config.validate()?;
        let secrets = SecretResolver::from_config(&config.secrets).await;
        Self::bootstrap_with(name, config, secrets, Arc::new(NatsConnector), store_mode).await
    }

    /// Bootstrap with an explicit secret resolver and broker connector
    pub async fn bootstrap_with(
        name: &str,
        config: RadarConfig,
        secrets: SecretResolver,
        connector: Arc<dyn BrokerConnector>,
        store_mode: StoreMode,
    ) -> RadarResult<Self> {
        config.validate()?;
        let instance_id = Uuid::new_v4();
        info!(agent = name, %instance_id, "🚀 BOOTSTRAP: Starting agent");

        let secrets = Arc::new(secrets);
        let health = Arc::new(AgentHealth::new(name));

        let primary = match &config.broker.url {
            Some(url) => url.clone(),
            None => secrets.nats_url().await,
        };
        let connection = Arc::new(ConnectionManager::new(
            Some(&primary),
            &config.broker.fallback_urls,
            config.broker.connect_timeout(),
            connector,
        ));

        connection
            .connect_with_retry(&config.retry.connect)
            .await
            .map_err(|e| {
                error!(agent = name, error = %e, "Could not reach any broker");
                RadarError::startup("broker", e.to_string())
            })?;

        let desired = config.broker.stream_descriptor();
        let outcome = StreamReconciler::new(Arc::clone(&connection))
            .reconcile(&desired)
            .await
            .map_err(|e| {
                error!(stream = %desired.name, error = %e, "Stream reconciliation failed");
                RadarError::startup("stream", e.to_string())
            })?;
        if outcome == ReconcileOutcome::Recreated {
            warn!(stream = %desired.name, "Stream was recreated during bootstrap");
        }
        info!(stream = %desired.name, outcome = ?outcome, "✅ BOOTSTRAP: Stream ready");

        let store = match store_mode {
            StoreMode::Disabled => None,
            StoreMode::Existing(client) => Some(client),
            StoreMode::Required => {
                let url = match &config.database.url {
                    Some(url) => url.clone(),
                    None => secrets.database_url().await,
                };
                let client = RetryingStoreClient::connect(
                    &url,
                    &config.database.pool,
                    config.retry.store.clone(),
                )
                .await
                .map_err(|e| RadarError::startup("store", e.to_string()))?;
                Some(client)
            }
        };

        let publisher = Arc::new(
            Publisher::new(
                Arc::clone(&connection),
                config.retry.publish.clone(),
                config.broker.subject_prefix.clone(),
            )
            .with_stream(desired),
        );
        let consumers = Arc::new(ConsumerManager::new(Arc::clone(&connection)));
        let (shutdown, _) = watch::channel(false);

        health.mark_ready();
        info!(agent = name, "🎉 BOOTSTRAP: Agent ready");

        Ok(Self {
            name: name.to_string(),
            instance_id,
            config,
            secrets,
            connection,
            consumers,
            publisher,
            store,
            dedup: Arc::new(DedupGuard::new()),
            health,
            shutdown,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn config(&self) -> &RadarConfig {
        &self.config
    }

    pub fn secrets(&self) -> &Arc<SecretResolver> {
        &self.secrets
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    pub fn publisher(&self) -> &Arc<Publisher> {
        &self.publisher
    }

    /// `None` when bootstrapped with [`StoreMode::Disabled`]
    pub fn store(&self) -> Option<&RetryingStoreClient> {
        self.store.as_ref()
    }

    pub fn dedup(&self) -> &Arc<DedupGuard> {
        &self.dedup
    }

    pub fn health(&self) -> &Arc<AgentHealth> {
        &self.health
    }

    /// Router wired to this agent's stream, counters and dedup guard
    pub fn router(&self) -> Router {
        Router::with_consumers(
            Arc::clone(&self.consumers),
            self.config.broker.stream.name.clone(),
            self.config.broker.subject_prefix.clone(),
        )
        .with_retry_policy(self.config.retry.subscribe.clone())
        .with_max_deliver(self.config.broker.max_deliver)
        .with_dedup(Arc::clone(&self.dedup))
        .with_health(Arc::clone(&self.health))
    }

    /// Ask [`AgentContext::wait_for_shutdown_signal`] to return
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Resolves on Ctrl-C or [`AgentContext::request_shutdown`]
    pub async fn wait_for_shutdown_signal(&self) {
        let mut requested = self.shutdown.subscribe();
        let ctrl_c = async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!(agent = %self.name, "Shutdown signal received"),
                Err(e) => {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = requested.wait_for(|stop| *stop) => {
                info!(agent = %self.name, "Shutdown requested");
            }
        }
    }

    /// Mark not ready, stop delivery loops, close broker and store
    ///
    /// Handlers still running are abandoned; their unacknowledged messages are
    /// redelivered by the broker.
    pub async fn shutdown(&self) {
        self.health.mark_not_ready();
        self.request_shutdown();
        self.consumers.stop_all();

        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Error closing broker connection");
        }
        if let Some(store) = &self.store {
            store.close().await;
        }
        info!(agent = %self.name, "Agent shut down");
    }
}
