//! # Connection Manager
//!
//! Owns the agent's single broker connection. Candidate URLs are tried in order
//! (configured primary first, then the fixed fallbacks with duplicates removed).
//! The manager never reconnects behind a caller's back: a dropped connection shows
//! up as a retryable error, and the calling primitive decides to call
//! [`ConnectionManager::connect`] again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::errors::MessagingError;
use super::service::{BrokerConnector, MessagingProvider};
use crate::resilience::RetryPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
struct ConnectionState {
    status: ConnectionStatus,
    active_url: Option<String>,
    provider: Option<Arc<MessagingProvider>>,
    /// Consecutive `connect` calls that exhausted every candidate
    retry_count: u32,
}

pub struct ConnectionManager {
    candidates: Vec<String>,
    timeout: Duration,
    connector: Arc<dyn BrokerConnector>,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("candidates", &self.candidates)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        primary: Option<&str>,
        fallbacks: &[String],
        timeout: Duration,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        Self {
            candidates: Self::candidate_urls(primary, fallbacks),
            timeout,
            connector,
            state: Mutex::new(ConnectionState {
                status: ConnectionStatus::Disconnected,
                active_url: None,
                provider: None,
                retry_count: 0,
            }),
        }
    }

    /// Primary first, then fallbacks, first occurrence wins
    pub fn candidate_urls(primary: Option<&str>, fallbacks: &[String]) -> Vec<String> {
        let mut urls: Vec<String> = Vec::with_capacity(fallbacks.len() + 1);
        for url in primary.into_iter().chain(fallbacks.iter().map(String::as_str)) {
            let url = url.trim();
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
        urls
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Connect with the configured per-URL timeout
    pub async fn connect(&self) -> Result<Arc<MessagingProvider>, MessagingError> {
        self.connect_with_timeout(self.timeout).await
    }

    /// Try each candidate once; a no-op returning the live handle when already connected
    pub async fn connect_with_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Arc<MessagingProvider>, MessagingError> {
        let mut state = self.state.lock().await;

        if let Some(provider) = &state.provider {
            if provider.is_connected() {
                return Ok(Arc::clone(provider));
            }
            warn!(
                url = state.active_url.as_deref().unwrap_or_default(),
                "Broker connection lost, reconnecting"
            );
            state.provider = None;
            state.active_url = None;
        }

        if self.candidates.is_empty() {
            state.status = ConnectionStatus::Disconnected;
            return Err(MessagingError::configuration(
                "connection",
                "no broker URL configured",
            ));
        }

        state.status = ConnectionStatus::Connecting;
        let mut last_error = String::new();

        for url in &self.candidates {
            debug!(url = %url, timeout_ms = timeout.as_millis() as u64, "Connecting to broker");
            match self.connector.connect(url, timeout).await {
                Ok(provider) => {
                    let provider = Arc::new(provider);
                    info!(
                        url = %url,
                        provider = provider.provider_name(),
                        "✅ Connected to broker"
                    );
                    state.status = ConnectionStatus::Connected;
                    state.active_url = Some(url.clone());
                    state.provider = Some(Arc::clone(&provider));
                    state.retry_count = 0;
                    return Ok(provider);
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Broker candidate failed");
                    last_error = e.to_string();
                }
            }
        }

        state.status = ConnectionStatus::Disconnected;
        state.retry_count += 1;
        Err(MessagingError::NoBrokerReachable {
            attempted: self.candidates.len(),
            last_error,
        })
    }

    /// `connect` under a retry policy; used at startup where exhaustion is fatal
    pub async fn connect_with_retry(
        &self,
        policy: &RetryPolicy,
    ) -> Result<Arc<MessagingProvider>, MessagingError> {
        policy
            .run("broker connect", MessagingError::is_retryable, |_| self.connect())
            .await
            .map_err(|failure| {
                if failure.exhausted {
                    MessagingError::retries_exhausted("broker connect", failure.attempts, failure.error)
                } else {
                    failure.error
                }
            })
    }

    /// Current handle without reconnecting
    pub async fn provider(&self) -> Result<Arc<MessagingProvider>, MessagingError> {
        let state = self.state.lock().await;
        match &state.provider {
            Some(provider) if provider.is_connected() => Ok(Arc::clone(provider)),
            _ => Err(MessagingError::not_connected()),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        let state = self.state.lock().await;
        match (&state.status, &state.provider) {
            (ConnectionStatus::Connected, Some(p)) if !p.is_connected() => {
                ConnectionStatus::Disconnected
            }
            (status, _) => *status,
        }
    }

    pub async fn active_url(&self) -> Option<String> {
        self.state.lock().await.active_url.clone()
    }

    pub async fn retry_count(&self) -> u32 {
        self.state.lock().await.retry_count
    }

    pub async fn is_connected(&self) -> bool {
        self.status().await == ConnectionStatus::Connected
    }

    /// Release the connection; deliveries bound to it stop
    pub async fn close(&self) -> Result<(), MessagingError> {
        let provider = {
            let mut state = self.state.lock().await;
            state.status = ConnectionStatus::Disconnected;
            state.active_url = None;
            state.provider.take()
        };
        if let Some(provider) = provider {
            provider.close().await?;
            info!("Broker connection closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::service::InMemoryBroker;

    fn fallbacks() -> Vec<String> {
        crate::constants::FALLBACK_BROKER_URLS
            .iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn test_candidates_deduplicate_primary() {
        let urls = ConnectionManager::candidate_urls(Some("nats://localhost:4222"), &fallbacks());
        assert_eq!(
            urls,
            vec![
                "nats://localhost:4222".to_string(),
                "nats://nats:4222".to_string(),
                "nats://host.docker.internal:4222".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_falls_through_to_first_reachable() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(&["nats://localhost:4222"]);
        let manager = ConnectionManager::new(
            Some("nats://primary:4222"),
            &fallbacks(),
            Duration::from_secs(1),
            Arc::new(broker.clone()),
        );

        manager.connect().await.unwrap();

        assert_eq!(manager.status().await, ConnectionStatus::Connected);
        assert_eq!(
            manager.active_url().await.as_deref(),
            Some("nats://localhost:4222")
        );
        assert_eq!(
            broker.connect_attempts(),
            vec![
                "nats://primary:4222".to_string(),
                "nats://nats:4222".to_string(),
                "nats://localhost:4222".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_connect_is_reentrant() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(
            Some("nats://primary:4222"),
            &[],
            Duration::from_secs(1),
            Arc::new(broker.clone()),
        );

        manager.connect().await.unwrap();
        manager.connect().await.unwrap();

        assert_eq!(broker.connect_attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_candidates_report_last_error() {
        let broker = InMemoryBroker::new();
        broker.set_unreachable();
        let manager = ConnectionManager::new(
            None,
            &fallbacks(),
            Duration::from_secs(1),
            Arc::new(broker),
        );

        let err = manager.connect().await.unwrap_err();
        match err {
            MessagingError::NoBrokerReachable {
                attempted,
                last_error,
            } => {
                assert_eq!(attempted, 3);
                assert!(last_error.contains("host.docker.internal"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.status().await, ConnectionStatus::Disconnected);
        assert_eq!(manager.retry_count().await, 1);
    }

    #[tokio::test]
    async fn test_lost_connection_is_surfaced_not_hidden() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(
            Some("nats://primary:4222"),
            &[],
            Duration::from_secs(1),
            Arc::new(broker.clone()),
        );
        manager.connect().await.unwrap();

        broker.drop_connections();

        assert!(matches!(
            manager.provider().await,
            Err(MessagingError::NotConnected)
        ));
        manager.connect().await.unwrap();
        assert_eq!(broker.connect_attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_close_releases_provider() {
        let broker = InMemoryBroker::new();
        let manager = ConnectionManager::new(
            Some("nats://primary:4222"),
            &[],
            Duration::from_secs(1),
            Arc::new(broker),
        );
        let provider = manager.connect().await.unwrap();

        manager.close().await.unwrap();

        assert!(!provider.is_connected());
        assert!(!manager.is_connected().await);
    }
}
