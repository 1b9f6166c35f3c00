//! # Messaging Provider Enum
//!
//! Enum dispatch over the concrete broker providers.

use super::providers::{InMemoryMessagingService, NatsMessagingService};
use super::traits::{DeliveryStream, MessagingService};
use super::types::{ConsumerDescriptor, PublishAck, StreamDescriptor};
use crate::messaging::errors::MessagingError;

/// Provider enum for zero-cost dispatch
///
/// - `Nats` - NATS JetStream via async-nats
/// - `InMemory` - in-process broker for tests and local development
#[derive(Debug)]
pub enum MessagingProvider {
    Nats(NatsMessagingService),
    InMemory(InMemoryMessagingService),
}

impl MessagingProvider {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Nats(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    pub async fn stream_info(
        &self,
        stream: &str,
    ) -> Result<Option<StreamDescriptor>, MessagingError> {
        match self {
            Self::Nats(s) => s.stream_info(stream).await,
            Self::InMemory(s) => s.stream_info(stream).await,
        }
    }

    pub async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        match self {
            Self::Nats(s) => s.create_stream(descriptor).await,
            Self::InMemory(s) => s.create_stream(descriptor).await,
        }
    }

    pub async fn update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        match self {
            Self::Nats(s) => s.update_stream(descriptor).await,
            Self::InMemory(s) => s.update_stream(descriptor).await,
        }
    }

    pub async fn delete_stream(&self, stream: &str) -> Result<bool, MessagingError> {
        match self {
            Self::Nats(s) => s.delete_stream(stream).await,
            Self::InMemory(s) => s.delete_stream(stream).await,
        }
    }

    pub async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<bool, MessagingError> {
        match self {
            Self::Nats(s) => s.delete_consumer(stream, durable).await,
            Self::InMemory(s) => s.delete_consumer(stream, durable).await,
        }
    }

    pub async fn create_consumer(
        &self,
        stream: &str,
        descriptor: &ConsumerDescriptor,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Nats(s) => s.create_consumer(stream, descriptor).await,
            Self::InMemory(s) => s.create_consumer(stream, descriptor).await,
        }
    }

    pub async fn consume(&self, stream: &str, durable: &str) -> Result<DeliveryStream, MessagingError> {
        match self {
            Self::Nats(s) => s.consume(stream, durable).await,
            Self::InMemory(s) => s.consume(stream, durable).await,
        }
    }

    pub async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, MessagingError> {
        match self {
            Self::Nats(s) => s.publish(subject, payload).await,
            Self::InMemory(s) => s.publish(subject, payload).await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Nats(s) => s.is_connected(),
            Self::InMemory(s) => s.is_connected(),
        }
    }

    pub async fn close(&self) -> Result<(), MessagingError> {
        match self {
            Self::Nats(s) => s.close().await,
            Self::InMemory(s) => s.close().await,
        }
    }
}
