//! # Messaging
//!
//! Everything between an agent and the JetStream broker.
//!
//! - [`service`] - Provider abstraction (`MessagingService`) with NATS and in-memory backends
//! - [`ConnectionManager`] - Ordered failover over candidate broker URLs
//! - [`StreamReconciler`] - Create, update, or destructively recreate the job stream
//! - [`ConsumerManager`] - Delete-then-create durable consumers bound to a handler
//! - [`Publisher`] - Retry-wrapped publish that reconnects on demand
//! - [`Router`] - Subject dispatch table with the always-ack policy
//!
//! Subjects follow `<prefix>.tasks.<kind>`, see [`TaskKind`].

pub mod connection;
pub mod consumer;
pub mod errors;
pub mod publisher;
pub mod router;
pub mod service;
pub mod stream;
pub mod subjects;
pub mod tasks;

pub use connection::{ConnectionManager, ConnectionStatus};
pub use consumer::{ConsumerManager, DeliveryHandler, LoopExit, Subscription};
pub use errors::MessagingError;
pub use publisher::Publisher;
pub use router::{handler_fn, DeliveryContext, FnHandler, Router, StartReport, TaskHandler};
pub use service::{
    AckPolicy, BrokerConnector, ConsumerDescriptor, DeliverPolicy, Delivery, InMemoryBroker,
    MessagingProvider, MessagingService, NatsConnector, PublishAck, QueueMessage,
    RetentionPolicy, StorageClass, StreamDescriptor,
};
pub use stream::{ReconcileOutcome, StreamReconciler};
pub use subjects::TaskKind;
pub use tasks::{
    ArticleFetchTask, ArticleId, RankTask, RssFetchTask, ShareTask, SummarizeTask, TaskPayload,
};

pub type MessagingResult<T> = Result<T, MessagingError>;
