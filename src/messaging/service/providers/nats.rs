//! # NATS JetStream Messaging Service
//!
//! `MessagingService` implementation on top of `async-nats`.
//!
//! - Streams map onto JetStream streams one-to-one
//! - Durable consumers are pull consumers; `consume` drives `messages()`
//! - `publish` waits for the JetStream storage ack, not just the socket write
//! - "not found" is detected through JetStream API error codes, never message text
//! - `close` flushes, then drains the client; a closed service never reports connected

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::connection::State;
use async_nats::jetstream::{self, consumer, stream, ErrorCode};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::messaging::errors::MessagingError;
use crate::messaging::service::provider::MessagingProvider;
use crate::messaging::service::traits::{BrokerConnector, DeliveryStream, MessagingService};
use crate::messaging::service::types::{
    AckHandle, AckPolicy, ConsumerDescriptor, DeliverPolicy, Delivery, PublishAck,
    RetentionPolicy, StorageClass, StreamDescriptor,
};

const CLIENT_NAME: &str = "ai-radar";
const MAX_RECONNECTS: usize = 5;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Opens JetStream connections
#[derive(Debug, Default, Clone)]
pub struct NatsConnector;

#[async_trait]
impl BrokerConnector for NatsConnector {
    async fn connect(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<MessagingProvider, MessagingError> {
        let service = NatsMessagingService::connect(url, timeout).await?;
        Ok(MessagingProvider::Nats(service))
    }
}

pub struct NatsMessagingService {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    url: String,
    closed: AtomicBool,
}

impl fmt::Debug for NatsMessagingService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsMessagingService")
            .field("url", &self.url)
            .field("state", &self.client.connection_state())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl NatsMessagingService {
    pub async fn connect(url: &str, timeout: Duration) -> Result<Self, MessagingError> {
        let options = async_nats::ConnectOptions::new()
            .name(CLIENT_NAME)
            .connection_timeout(timeout)
            .max_reconnects(MAX_RECONNECTS)
            .reconnect_delay_callback(|_| RECONNECT_DELAY);

        let client = tokio::time::timeout(timeout, options.connect(url))
            .await
            .map_err(|_| MessagingError::timeout(format!("connect {url}"), timeout.as_millis() as u64))??;

        debug!(url, "Connected to NATS");

        Ok(Self {
            jetstream: jetstream::new(client.clone()),
            client,
            url: url.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_stream(&self, name: &str) -> Result<Option<jetstream::stream::Stream>, MessagingError> {
        match self.jetstream.get_stream(name).await {
            Ok(stream) => Ok(Some(stream)),
            Err(err) => match err.kind() {
                jetstream::context::GetStreamErrorKind::JetStream(api)
                    if api.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(None)
                }
                _ => Err(MessagingError::stream_operation(name, "info", err.to_string())),
            },
        }
    }
}

fn is_live(closed: bool, state: &State) -> bool {
    !closed && *state == State::Connected
}

fn stream_config(descriptor: &StreamDescriptor) -> stream::Config {
    stream::Config {
        name: descriptor.name.clone(),
        subjects: descriptor.subjects.clone(),
        retention: match descriptor.retention {
            RetentionPolicy::Limits => stream::RetentionPolicy::Limits,
            RetentionPolicy::Interest => stream::RetentionPolicy::Interest,
            RetentionPolicy::WorkQueue => stream::RetentionPolicy::WorkQueue,
        },
        storage: match descriptor.storage {
            StorageClass::File => stream::StorageType::File,
            StorageClass::Memory => stream::StorageType::Memory,
        },
        num_replicas: descriptor.replicas,
        max_messages: descriptor.max_messages,
        ..Default::default()
    }
}

fn stream_descriptor(config: &stream::Config) -> StreamDescriptor {
    StreamDescriptor {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        retention: match config.retention {
            stream::RetentionPolicy::Limits => RetentionPolicy::Limits,
            stream::RetentionPolicy::Interest => RetentionPolicy::Interest,
            stream::RetentionPolicy::WorkQueue => RetentionPolicy::WorkQueue,
        },
        storage: match config.storage {
            stream::StorageType::Memory => StorageClass::Memory,
            stream::StorageType::File => StorageClass::File,
        },
        replicas: config.num_replicas,
        max_messages: config.max_messages,
    }
}

fn consumer_config(descriptor: &ConsumerDescriptor) -> consumer::pull::Config {
    consumer::pull::Config {
        durable_name: Some(descriptor.durable.clone()),
        filter_subject: descriptor.filter_subject.clone().unwrap_or_default(),
        ack_policy: match descriptor.ack_policy {
            AckPolicy::Explicit => consumer::AckPolicy::Explicit,
            AckPolicy::All => consumer::AckPolicy::All,
            AckPolicy::None => consumer::AckPolicy::None,
        },
        deliver_policy: match descriptor.deliver_policy {
            DeliverPolicy::All => consumer::DeliverPolicy::All,
            DeliverPolicy::New => consumer::DeliverPolicy::New,
        },
        max_deliver: descriptor.max_deliver,
        ..Default::default()
    }
}

fn to_delivery(message: jetstream::Message) -> Result<Delivery, MessagingError> {
    let (stream_sequence, delivered) = {
        let info = message
            .info()
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))?;
        (info.stream_sequence, info.delivered)
    };

    Ok(Delivery::new(
        message.message.subject.to_string(),
        message.message.payload.to_vec(),
        message.message.reply.as_ref().map(|r| r.to_string()),
        stream_sequence,
        delivered.max(1) as u64,
        AckHandle::Nats(Box::new(message)),
    ))
}

#[async_trait]
impl MessagingService for NatsMessagingService {
    async fn stream_info(&self, stream: &str) -> Result<Option<StreamDescriptor>, MessagingError> {
        Ok(self
            .get_stream(stream)
            .await?
            .map(|s| stream_descriptor(&s.cached_info().config)))
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        self.jetstream
            .create_stream(stream_config(descriptor))
            .await
            .map_err(|e| MessagingError::stream_operation(&descriptor.name, "create", e.to_string()))?;
        Ok(())
    }

    async fn update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        self.jetstream
            .update_stream(stream_config(descriptor))
            .await
            .map_err(|e| MessagingError::stream_operation(&descriptor.name, "update", e.to_string()))?;
        Ok(())
    }

    async fn delete_stream(&self, stream: &str) -> Result<bool, MessagingError> {
        match self.jetstream.delete_stream(stream).await {
            Ok(status) => Ok(status.success),
            Err(err) => match err.kind() {
                jetstream::context::DeleteStreamErrorKind::JetStream(api)
                    if api.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(MessagingError::stream_operation(stream, "delete", err.to_string())),
            },
        }
    }

    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<bool, MessagingError> {
        let Some(handle) = self.get_stream(stream).await? else {
            return Ok(false);
        };
        match handle.delete_consumer(durable).await {
            Ok(status) => Ok(status.success),
            Err(err) => match err.kind() {
                jetstream::stream::ConsumerErrorKind::JetStream(api)
                    if api.error_code() == ErrorCode::CONSUMER_NOT_FOUND =>
                {
                    Ok(false)
                }
                _ => Err(MessagingError::consumer_operation(
                    stream,
                    durable,
                    "delete",
                    err.to_string(),
                )),
            },
        }
    }

    async fn create_consumer(
        &self,
        stream: &str,
        descriptor: &ConsumerDescriptor,
    ) -> Result<(), MessagingError> {
        let handle = self
            .get_stream(stream)
            .await?
            .ok_or_else(|| MessagingError::stream_not_found(stream))?;
        handle
            .create_consumer(consumer_config(descriptor))
            .await
            .map_err(|e| {
                MessagingError::consumer_operation(stream, &descriptor.durable, "create", e.to_string())
            })?;
        Ok(())
    }

    async fn consume(&self, stream: &str, durable: &str) -> Result<DeliveryStream, MessagingError> {
        let handle = self
            .get_stream(stream)
            .await?
            .ok_or_else(|| MessagingError::stream_not_found(stream))?;
        let pull: consumer::Consumer<consumer::pull::Config> = handle
            .get_consumer(durable)
            .await
            .map_err(|e| MessagingError::consumer_operation(stream, durable, "get", e.to_string()))?;
        let messages = pull
            .messages()
            .await
            .map_err(|e| MessagingError::consumer_operation(stream, durable, "consume", e.to_string()))?;

        let deliveries = messages.map(|item| match item {
            Ok(message) => to_delivery(message),
            Err(e) => Err(MessagingError::connection(e.to_string())),
        });
        Ok(Box::pin(deliveries))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, MessagingError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(MessagingError::not_connected());
        }
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| MessagingError::publish(subject, e.to_string()))?
            .await
            .map_err(|e| MessagingError::publish(subject, e.to_string()))?;

        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
            duplicate: ack.duplicate,
        })
    }

    fn is_connected(&self) -> bool {
        is_live(self.closed.load(Ordering::Acquire), &self.client.connection_state())
    }

    /// Flush pending publishes, then drain subscriptions and shut the client down
    async fn close(&self) -> Result<(), MessagingError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.client.flush().await {
            warn!(url = %self.url, error = %e, "Flush on close failed, draining anyway");
        }
        self.client
            .drain()
            .await
            .map_err(|e| MessagingError::connection(format!("drain on close failed: {e}")))?;
        debug!(url = %self.url, "NATS client drained");
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "nats"
    }
}
