//! # Messaging Service Traits
//!
//! Core trait definitions for provider-agnostic broker access.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use super::provider::MessagingProvider;
use super::types::{ConsumerDescriptor, Delivery, PublishAck, StreamDescriptor};
use crate::messaging::errors::MessagingError;

/// Deliveries for one durable consumer; ends when the consumer or connection goes away
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, MessagingError>> + Send>>;

/// Operations the orchestration layer needs from a durable-stream broker
///
/// Implementations map "not found" conditions onto `Ok(None)` / `Ok(false)` so the
/// reconciler and consumer manager can tell them apart from real API errors.
#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Current stream configuration, `None` when the stream does not exist
    async fn stream_info(&self, stream: &str) -> Result<Option<StreamDescriptor>, MessagingError>;

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError>;

    /// In-place update; the broker rejects retention changes
    async fn update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError>;

    /// Returns false when there was nothing to delete
    async fn delete_stream(&self, stream: &str) -> Result<bool, MessagingError>;

    /// Returns false when the consumer (or its stream) does not exist
    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<bool, MessagingError>;

    async fn create_consumer(
        &self,
        stream: &str,
        descriptor: &ConsumerDescriptor,
    ) -> Result<(), MessagingError>;

    /// Start pulling deliveries for an existing durable consumer
    async fn consume(&self, stream: &str, durable: &str) -> Result<DeliveryStream, MessagingError>;

    /// Publish and wait for the broker's storage acknowledgement
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, MessagingError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), MessagingError>;

    /// Provider name for logging
    fn provider_name(&self) -> &'static str;
}

/// Opens broker connections for the [`ConnectionManager`](crate::messaging::ConnectionManager)
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
    async fn connect(&self, url: &str, timeout: Duration)
        -> Result<MessagingProvider, MessagingError>;
}

/// Message serialization contract
///
/// Anything serde-serializable can be published; the wire format is JSON.
pub trait QueueMessage: Send + Sync {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}
