//! # Messaging Error Types
//!
//! Structured errors for the broker layer. Constructors keep call sites short and
//! [`MessagingError::is_retryable`] drives the publish/subscribe retry policies.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker connection error: {message}")]
    Connection { message: String },

    #[error("Not connected to any broker")]
    NotConnected,

    #[error("No broker reachable after trying {attempted} candidate URL(s): {last_error}")]
    NoBrokerReachable { attempted: usize, last_error: String },

    #[error("Stream not found: {stream}")]
    StreamNotFound { stream: String },

    #[error("Stream operation failed: {stream}: {operation}: {message}")]
    StreamOperation {
        stream: String,
        operation: String,
        message: String,
    },

    #[error("Consumer operation failed: {stream}/{consumer}: {operation}: {message}")]
    ConsumerOperation {
        stream: String,
        consumer: String,
        operation: String,
        message: String,
    },

    #[error("Publish failed on {subject}: {message}")]
    Publish { subject: String, message: String },

    #[error("Acknowledgement failed: {message}")]
    Ack { message: String },

    #[error("{operation} failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Handler already registered for subject: {subject}")]
    DuplicateHandler { subject: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Network timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn not_connected() -> Self {
        Self::NotConnected
    }

    pub fn stream_not_found(stream: impl Into<String>) -> Self {
        Self::StreamNotFound {
            stream: stream.into(),
        }
    }

    pub fn stream_operation(
        stream: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StreamOperation {
            stream: stream.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn consumer_operation(
        stream: impl Into<String>,
        consumer: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ConsumerOperation {
            stream: stream.into(),
            consumer: consumer.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn publish(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publish {
            subject: subject.into(),
            message: message.into(),
        }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        Self::Ack {
            message: message.into(),
        }
    }

    pub fn retries_exhausted(
        operation: impl Into<String>,
        attempts: u32,
        last_error: impl ToString,
    ) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            attempts,
            last_error: last_error.to_string(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn duplicate_handler(subject: impl Into<String>) -> Self {
        Self::DuplicateHandler {
            subject: subject.into(),
        }
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Transport-level failures worth another attempt
    ///
    /// Stream and consumer API errors are not retryable here: a broker that
    /// answers with an error answered, and reconciliation treats that as fatal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::NotConnected
                | Self::NoBrokerReachable { .. }
                | Self::Publish { .. }
                | Self::Ack { .. }
                | Self::Timeout { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::message_deserialization(err.to_string())
        } else {
            Self::message_serialization(err.to_string())
        }
    }
}

impl From<async_nats::ConnectError> for MessagingError {
    fn from(err: async_nats::ConnectError) -> Self {
        Self::connection(err.to_string())
    }
}
