//! Concrete broker providers.

pub mod in_memory;
pub mod nats;

pub use in_memory::{BrokerOp, InMemoryBroker, InMemoryMessagingService, StoredMessage};
pub use nats::{NatsConnector, NatsMessagingService};
