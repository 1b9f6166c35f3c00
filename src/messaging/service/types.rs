//! # Messaging Service Types
//!
//! Provider-agnostic descriptors for streams and consumers, the publish
//! acknowledgement, and the single delivery envelope handed to handlers.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::providers::in_memory::InMemoryAck;
use crate::constants;
use crate::messaging::errors::MessagingError;
use crate::messaging::subjects::stream_subjects;

/// Stream retention
///
/// Retention cannot be changed in place; the stream has to be deleted and
/// recreated, which discards every unacknowledged message on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Kept until size or age limits apply
    Limits,
    /// Kept while a consumer has yet to acknowledge it
    Interest,
    /// Removed after the first acknowledgement
    WorkQueue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageClass {
    File,
    Memory,
}

/// Desired or observed stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub name: String,
    pub subjects: Vec<String>,
    pub retention: RetentionPolicy,
    pub storage: StorageClass,
    pub replicas: usize,
    pub max_messages: i64,
}

impl StreamDescriptor {
    /// Work-queue, file-backed stream capturing `<prefix>.>`
    pub fn for_prefix(name: impl Into<String>, prefix: &str) -> Self {
        Self {
            name: name.into(),
            subjects: stream_subjects(prefix),
            retention: RetentionPolicy::WorkQueue,
            storage: StorageClass::File,
            replicas: 1,
            max_messages: constants::DEFAULT_STREAM_MAX_MESSAGES,
        }
    }

    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_storage(mut self, storage: StorageClass) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    pub fn with_max_messages(mut self, max_messages: i64) -> Self {
        self.max_messages = max_messages;
        self
    }

    /// Retention differs, so an in-place update would be rejected
    pub fn requires_recreate(&self, current: &StreamDescriptor) -> bool {
        self.retention != current.retention
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    Explicit,
    All,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverPolicy {
    All,
    New,
}

/// Durable consumer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerDescriptor {
    pub durable: String,
    /// Empty means the whole stream
    pub filter_subject: Option<String>,
    pub ack_policy: AckPolicy,
    pub deliver_policy: DeliverPolicy,
    pub max_deliver: i64,
}

impl ConsumerDescriptor {
    /// Explicit ack, deliver all, bounded redelivery
    pub fn new(durable: impl Into<String>) -> Self {
        Self {
            durable: durable.into(),
            filter_subject: None,
            ack_policy: AckPolicy::Explicit,
            deliver_policy: DeliverPolicy::All,
            max_deliver: constants::DEFAULT_MAX_DELIVER,
        }
    }

    pub fn with_filter_subject(mut self, subject: impl Into<String>) -> Self {
        self.filter_subject = Some(subject.into());
        self
    }

    pub fn with_max_deliver(mut self, max_deliver: i64) -> Self {
        self.max_deliver = max_deliver;
        self
    }

    pub fn with_deliver_policy(mut self, deliver_policy: DeliverPolicy) -> Self {
        self.deliver_policy = deliver_policy;
        self
    }
}

/// Broker confirmation that a message is durably stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
    pub duplicate: bool,
}

/// Provider-specific acknowledgement target
pub enum AckHandle {
    Nats(Box<async_nats::jetstream::Message>),
    InMemory(InMemoryAck),
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nats(_) => f.write_str("AckHandle::Nats"),
            Self::InMemory(ack) => f.debug_tuple("AckHandle::InMemory").field(ack).finish(),
        }
    }
}

/// The one envelope every handler sees
#[derive(Debug)]
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
    /// Broker-assigned position in the stream; stable across redeliveries
    pub stream_sequence: u64,
    /// 1 on first delivery
    pub delivery_count: u64,
    acker: AckHandle,
    acked: AtomicBool,
}

impl Delivery {
    pub fn new(
        subject: impl Into<String>,
        payload: Vec<u8>,
        reply_to: Option<String>,
        stream_sequence: u64,
        delivery_count: u64,
        acker: AckHandle,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            reply_to,
            stream_sequence,
            delivery_count,
            acker,
            acked: AtomicBool::new(false),
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, MessagingError> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }

    pub fn is_acked(&self) -> bool {
        self.acked.load(Ordering::Acquire)
    }

    /// Acknowledge once; later calls return `Ok(false)` without touching the broker
    pub async fn ack(&self) -> Result<bool, MessagingError> {
        if self
            .acked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let result = match &self.acker {
            AckHandle::Nats(message) => message
                .ack()
                .await
                .map_err(|e| MessagingError::ack(e.to_string())),
            AckHandle::InMemory(ack) => ack.ack(),
        };

        if let Err(e) = result {
            self.acked.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = StreamDescriptor::for_prefix("ai-radar", "ai-radar");
        assert_eq!(descriptor.subjects, vec!["ai-radar.>".to_string()]);
        assert_eq!(descriptor.retention, RetentionPolicy::WorkQueue);
        assert_eq!(descriptor.storage, StorageClass::File);

        let consumer = ConsumerDescriptor::new("fetcher-rss");
        assert_eq!(consumer.ack_policy, AckPolicy::Explicit);
        assert_eq!(consumer.deliver_policy, DeliverPolicy::All);
        assert_eq!(consumer.max_deliver, 3);
    }

    #[test]
    fn test_requires_recreate_only_on_retention_change() {
        let desired = StreamDescriptor::for_prefix("ai-radar", "ai-radar");
        let limits = desired.clone().with_retention(RetentionPolicy::Limits);
        let bigger = desired.clone().with_max_messages(5);

        let interest = desired.clone().with_retention(RetentionPolicy::Interest);

        assert!(desired.requires_recreate(&limits));
        assert!(desired.requires_recreate(&interest));
        assert!(limits.requires_recreate(&interest));
        assert!(!desired.requires_recreate(&bigger));
    }
}
