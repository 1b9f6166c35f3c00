//! # In-Memory Messaging Service
//!
//! In-process broker with the JetStream semantics the orchestration layer relies on:
//!
//! - streams with subject filters, retention and per-stream sequence numbers
//! - durable consumers with explicit ack and a delivery cursor
//! - work-queue streams drop a message from the visible backlog once acknowledged
//! - "not found" answers for missing streams and consumers
//!
//! The broker also exposes knobs for failure testing: which URLs are reachable,
//! injected publish failures, dropped connections, an operation log and ack counters.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::messaging::errors::MessagingError;
use crate::messaging::service::provider::MessagingProvider;
use crate::messaging::service::traits::{BrokerConnector, DeliveryStream, MessagingService};
use crate::messaging::service::types::{
    AckHandle, ConsumerDescriptor, DeliverPolicy, Delivery, PublishAck, RetentionPolicy,
    StreamDescriptor,
};
use crate::messaging::subjects::subject_matches;

/// Administrative operations recorded by the broker, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    CreateStream(String),
    UpdateStream(String),
    DeleteStream(String),
    CreateConsumer { stream: String, durable: String },
    DeleteConsumer { stream: String, durable: String },
}

/// A message as stored on an in-memory stream
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub sequence: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    pub deliveries: u64,
    pub ack_count: u32,
}

impl StoredMessage {
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

#[derive(Debug)]
struct MemConsumer {
    descriptor: ConsumerDescriptor,
    /// Last stream sequence handed out
    cursor: u64,
    redeliver: VecDeque<u64>,
}

#[derive(Debug)]
struct MemStream {
    descriptor: StreamDescriptor,
    next_sequence: u64,
    messages: BTreeMap<u64, StoredMessage>,
    consumers: HashMap<String, MemConsumer>,
}

impl MemStream {
    fn new(descriptor: StreamDescriptor) -> Self {
        Self {
            descriptor,
            next_sequence: 1,
            messages: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }

    fn captures(&self, subject: &str) -> bool {
        self.descriptor
            .subjects
            .iter()
            .any(|filter| subject_matches(filter, subject))
    }

    fn is_pending(&self, message: &StoredMessage) -> bool {
        self.descriptor.retention != RetentionPolicy::WorkQueue || message.ack_count == 0
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: HashMap<String, MemStream>,
    ops: Vec<BrokerOp>,
    /// `None` means every URL is reachable
    reachable: Option<HashSet<String>>,
    connect_attempts: Vec<String>,
    publish_failures: u32,
    /// Bumped by `drop_connections`; services from an older epoch are disconnected
    epoch: u64,
}

enum NextDelivery {
    Ready(Delivery),
    Idle,
    Closed,
}

/// Shared in-process broker; clones share state
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemoryBroker")
            .field("streams", &state.streams.len())
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            changes: Arc::new(changes),
        }
    }

    /// Connected service bypassing reachability rules
    pub fn service(&self, url: impl Into<String>) -> InMemoryMessagingService {
        let epoch = self.state.lock().epoch;
        InMemoryMessagingService {
            broker: self.clone(),
            url: url.into(),
            epoch,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn provider(&self, url: impl Into<String>) -> MessagingProvider {
        MessagingProvider::InMemory(self.service(url))
    }

    fn notify(&self) {
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
    }

    /// Only these URLs accept connections from now on
    pub fn set_reachable(&self, urls: &[&str]) {
        self.state.lock().reachable = Some(urls.iter().map(|u| u.to_string()).collect());
    }

    pub fn set_all_reachable(&self) {
        self.state.lock().reachable = None;
    }

    pub fn set_unreachable(&self) {
        self.state.lock().reachable = Some(HashSet::new());
    }

    /// URLs passed to `connect`, in order
    pub fn connect_attempts(&self) -> Vec<String> {
        self.state.lock().connect_attempts.clone()
    }

    /// The next `count` publishes fail with a retryable error
    pub fn fail_next_publishes(&self, count: u32) {
        self.state.lock().publish_failures = count;
    }

    /// Disconnect every service opened so far
    pub fn drop_connections(&self) {
        self.state.lock().epoch += 1;
        self.notify();
    }

    pub fn ops(&self) -> Vec<BrokerOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Create a stream without recording an operation
    pub fn seed_stream(&self, descriptor: StreamDescriptor) {
        let mut state = self.state.lock();
        state
            .streams
            .insert(descriptor.name.clone(), MemStream::new(descriptor));
    }

    pub fn stream(&self, name: &str) -> Option<StreamDescriptor> {
        self.state
            .lock()
            .streams
            .get(name)
            .map(|s| s.descriptor.clone())
    }

    pub fn consumer_names(&self, stream: &str) -> Vec<String> {
        let state = self.state.lock();
        let mut names: Vec<String> = state
            .streams
            .get(stream)
            .map(|s| s.consumers.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn consumer(&self, stream: &str, durable: &str) -> Option<ConsumerDescriptor> {
        self.state
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.consumers.get(durable))
            .map(|c| c.descriptor.clone())
    }

    /// Every message ever stored on the stream, acknowledged or not
    pub fn messages(&self, stream: &str) -> Vec<StoredMessage> {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|s| s.messages.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages still waiting for an acknowledgement (work-queue) or retained (limits)
    pub fn pending_count(&self, stream: &str) -> usize {
        let state = self.state.lock();
        state
            .streams
            .get(stream)
            .map(|s| s.messages.values().filter(|m| s.is_pending(m)).count())
            .unwrap_or(0)
    }

    pub fn ack_count(&self, stream: &str, sequence: u64) -> u32 {
        self.state
            .lock()
            .streams
            .get(stream)
            .and_then(|s| s.messages.get(&sequence))
            .map(|m| m.ack_count)
            .unwrap_or(0)
    }

    /// Hand a message to the consumer again, as after an ack timeout
    pub fn redeliver(&self, stream: &str, durable: &str, sequence: u64) -> bool {
        let queued = {
            let mut state = self.state.lock();
            let Some(mem_stream) = state.streams.get_mut(stream) else {
                return false;
            };
            if !mem_stream.messages.contains_key(&sequence) {
                return false;
            }
            match mem_stream.consumers.get_mut(durable) {
                Some(consumer) => {
                    consumer.redeliver.push_back(sequence);
                    true
                }
                None => false,
            }
        };
        if queued {
            self.notify();
        }
        queued
    }

    fn next_delivery(
        &self,
        stream: &str,
        durable: &str,
        epoch: u64,
        closed: &AtomicBool,
    ) -> NextDelivery {
        let mut state = self.state.lock();
        if state.epoch != epoch || closed.load(Ordering::Acquire) {
            return NextDelivery::Closed;
        }
        let Some(mem_stream) = state.streams.get_mut(stream) else {
            return NextDelivery::Closed;
        };
        let MemStream {
            messages,
            consumers,
            descriptor,
            ..
        } = mem_stream;
        let Some(consumer) = consumers.get_mut(durable) else {
            return NextDelivery::Closed;
        };

        let sequence = match consumer.redeliver.pop_front() {
            Some(sequence) => Some(sequence),
            None => {
                let filter = consumer.descriptor.filter_subject.as_deref();
                let next = messages
                    .range(consumer.cursor + 1..)
                    .find(|(_, m)| {
                        filter.map_or(true, |f| subject_matches(f, &m.subject))
                            && (descriptor.retention != RetentionPolicy::WorkQueue
                                || m.ack_count == 0)
                    })
                    .map(|(seq, _)| *seq);
                if let Some(seq) = next {
                    consumer.cursor = seq;
                }
                next
            }
        };

        let Some(sequence) = sequence else {
            return NextDelivery::Idle;
        };
        let Some(message) = messages.get_mut(&sequence) else {
            return NextDelivery::Idle;
        };
        message.deliveries += 1;

        NextDelivery::Ready(Delivery::new(
            message.subject.clone(),
            message.payload.clone(),
            None,
            sequence,
            message.deliveries,
            AckHandle::InMemory(InMemoryAck {
                state: Arc::clone(&self.state),
                stream: stream.to_string(),
                sequence,
            }),
        ))
    }
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
    async fn connect(
        &self,
        url: &str,
        _timeout: Duration,
    ) -> Result<MessagingProvider, MessagingError> {
        let reachable = {
            let mut state = self.state.lock();
            state.connect_attempts.push(url.to_string());
            state
                .reachable
                .as_ref()
                .map_or(true, |urls| urls.contains(url))
        };

        if reachable {
            Ok(self.provider(url))
        } else {
            Err(MessagingError::connection(format!("{url}: connection refused")))
        }
    }
}

/// Acknowledgement target of an in-memory delivery
pub struct InMemoryAck {
    state: Arc<Mutex<BrokerState>>,
    stream: String,
    sequence: u64,
}

impl fmt::Debug for InMemoryAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryAck")
            .field("stream", &self.stream)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl InMemoryAck {
    pub(crate) fn ack(&self) -> Result<(), MessagingError> {
        let mut state = self.state.lock();
        let message = state
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.messages.get_mut(&self.sequence))
            .ok_or_else(|| {
                MessagingError::ack(format!(
                    "message {} no longer exists on {}",
                    self.sequence, self.stream
                ))
            })?;
        message.ack_count += 1;
        Ok(())
    }
}

/// One connection to an [`InMemoryBroker`]
#[derive(Debug)]
pub struct InMemoryMessagingService {
    broker: InMemoryBroker,
    url: String,
    epoch: u64,
    closed: Arc<AtomicBool>,
}

impl InMemoryMessagingService {
    pub fn url(&self) -> &str {
        &self.url
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(MessagingError::not_connected())
        }
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn stream_info(&self, stream: &str) -> Result<Option<StreamDescriptor>, MessagingError> {
        self.ensure_connected()?;
        Ok(self.broker.stream(stream))
    }

    async fn create_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.broker.state.lock();
        if state.streams.contains_key(&descriptor.name) {
            return Err(MessagingError::stream_operation(
                &descriptor.name,
                "create",
                "stream name already in use",
            ));
        }
        state
            .streams
            .insert(descriptor.name.clone(), MemStream::new(descriptor.clone()));
        state.ops.push(BrokerOp::CreateStream(descriptor.name.clone()));
        Ok(())
    }

    async fn update_stream(&self, descriptor: &StreamDescriptor) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.broker.state.lock();
        let stream = state
            .streams
            .get_mut(&descriptor.name)
            .ok_or_else(|| MessagingError::stream_not_found(&descriptor.name))?;
        if stream.descriptor.retention != descriptor.retention {
            return Err(MessagingError::stream_operation(
                &descriptor.name,
                "update",
                "stream configuration update can not change retention policy",
            ));
        }
        stream.descriptor = descriptor.clone();
        state.ops.push(BrokerOp::UpdateStream(descriptor.name.clone()));
        Ok(())
    }

    async fn delete_stream(&self, stream: &str) -> Result<bool, MessagingError> {
        self.ensure_connected()?;
        let removed = {
            let mut state = self.broker.state.lock();
            let removed = state.streams.remove(stream).is_some();
            if removed {
                state.ops.push(BrokerOp::DeleteStream(stream.to_string()));
            }
            removed
        };
        if removed {
            self.broker.notify();
        }
        Ok(removed)
    }

    async fn delete_consumer(&self, stream: &str, durable: &str) -> Result<bool, MessagingError> {
        self.ensure_connected()?;
        let removed = {
            let mut state = self.broker.state.lock();
            let removed = state
                .streams
                .get_mut(stream)
                .and_then(|s| s.consumers.remove(durable))
                .is_some();
            if removed {
                state.ops.push(BrokerOp::DeleteConsumer {
                    stream: stream.to_string(),
                    durable: durable.to_string(),
                });
            }
            removed
        };
        if removed {
            self.broker.notify();
        }
        Ok(removed)
    }

    async fn create_consumer(
        &self,
        stream: &str,
        descriptor: &ConsumerDescriptor,
    ) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        let mut state = self.broker.state.lock();
        let mem_stream = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| MessagingError::stream_not_found(stream))?;

        if let Some(existing) = mem_stream.consumers.get(&descriptor.durable) {
            if existing.descriptor == *descriptor {
                return Ok(());
            }
            return Err(MessagingError::consumer_operation(
                stream,
                &descriptor.durable,
                "create",
                "consumer already exists with a different configuration",
            ));
        }

        let cursor = match descriptor.deliver_policy {
            DeliverPolicy::All => 0,
            DeliverPolicy::New => mem_stream.next_sequence - 1,
        };
        mem_stream.consumers.insert(
            descriptor.durable.clone(),
            MemConsumer {
                descriptor: descriptor.clone(),
                cursor,
                redeliver: VecDeque::new(),
            },
        );
        state.ops.push(BrokerOp::CreateConsumer {
            stream: stream.to_string(),
            durable: descriptor.durable.clone(),
        });
        Ok(())
    }

    async fn consume(&self, stream: &str, durable: &str) -> Result<DeliveryStream, MessagingError> {
        self.ensure_connected()?;
        {
            let state = self.broker.state.lock();
            let mem_stream = state
                .streams
                .get(stream)
                .ok_or_else(|| MessagingError::stream_not_found(stream))?;
            if !mem_stream.consumers.contains_key(durable) {
                return Err(MessagingError::consumer_operation(
                    stream,
                    durable,
                    "consume",
                    "consumer not found",
                ));
            }
        }

        let cursor = ConsumeCursor {
            broker: self.broker.clone(),
            stream: stream.to_string(),
            durable: durable.to_string(),
            epoch: self.epoch,
            closed: Arc::clone(&self.closed),
            changes: self.broker.changes.subscribe(),
        };

        let deliveries = futures::stream::unfold(cursor, |mut cursor| async move {
            loop {
                let _ = cursor.changes.borrow_and_update();
                match cursor.broker.next_delivery(
                    &cursor.stream,
                    &cursor.durable,
                    cursor.epoch,
                    &cursor.closed,
                ) {
                    NextDelivery::Ready(delivery) => return Some((Ok(delivery), cursor)),
                    NextDelivery::Closed => return None,
                    NextDelivery::Idle => {}
                }
                if cursor.changes.changed().await.is_err() {
                    return None;
                }
            }
        });

        Ok(Box::pin(deliveries))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, MessagingError> {
        self.ensure_connected()?;
        let ack = {
            let mut state = self.broker.state.lock();
            if state.publish_failures > 0 {
                state.publish_failures -= 1;
                return Err(MessagingError::publish(subject, "injected publish failure"));
            }

            let mem_stream = state
                .streams
                .values_mut()
                .find(|s| s.captures(subject))
                .ok_or_else(|| MessagingError::publish(subject, "no stream matches subject"))?;

            let sequence = mem_stream.next_sequence;
            mem_stream.next_sequence += 1;
            mem_stream.messages.insert(
                sequence,
                StoredMessage {
                    sequence,
                    subject: subject.to_string(),
                    payload,
                    deliveries: 0,
                    ack_count: 0,
                },
            );

            PublishAck {
                stream: mem_stream.descriptor.name.clone(),
                sequence,
                duplicate: false,
            }
        };
        self.broker.notify();
        Ok(ack)
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.broker.state.lock().epoch == self.epoch
    }

    async fn close(&self) -> Result<(), MessagingError> {
        self.closed.store(true, Ordering::Release);
        self.broker.notify();
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

struct ConsumeCursor {
    broker: InMemoryBroker,
    stream: String,
    durable: String,
    epoch: u64,
    closed: Arc<AtomicBool>,
    changes: watch::Receiver<u64>,
}
