//! # Messaging Service Abstraction Layer
//!
//! Provider-agnostic broker abstraction with enum dispatch.
//!
//! ```text
//! BrokerConnector (trait)       <- opens a provider for one URL
//!   ├── NatsConnector
//!   └── InMemoryBroker
//!
//! MessagingProvider (enum)      <- dispatch, no vtable
//!   ├── Nats(NatsMessagingService)
//!   └── InMemory(InMemoryMessagingService)
//! ```
//!
//! Everything above this layer (reconciler, consumers, publisher, router) only sees
//! [`MessagingProvider`], [`Delivery`] and the descriptor types.

mod provider;
pub mod providers;
mod traits;
mod types;

pub use provider::MessagingProvider;
pub use providers::{
    BrokerOp, InMemoryBroker, InMemoryMessagingService, NatsConnector, NatsMessagingService,
    StoredMessage,
};
pub use traits::{BrokerConnector, DeliveryStream, MessagingService, QueueMessage};
pub use types::{
    AckHandle, AckPolicy, ConsumerDescriptor, DeliverPolicy, Delivery, PublishAck,
    RetentionPolicy, StorageClass, StreamDescriptor,
};
