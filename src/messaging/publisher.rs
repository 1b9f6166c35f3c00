//! # Publisher
//!
//! Retry-wrapped publish. Every attempt first makes sure the connection is up
//! (a failed reconnect counts as a failed attempt), then publishes and waits for
//! the broker's storage ack. Safe to share between concurrent producers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use super::connection::ConnectionManager;
use super::errors::MessagingError;
use super::service::{PublishAck, QueueMessage, StreamDescriptor};
use super::stream::StreamReconciler;
use super::subjects::qualify;
use super::tasks::TaskPayload;
use crate::resilience::RetryPolicy;

#[derive(Debug)]
pub struct Publisher {
    connection: Arc<ConnectionManager>,
    policy: RetryPolicy,
    prefix: String,
    /// Created on first publish when missing
    stream: Option<StreamDescriptor>,
    stream_ready: AtomicBool,
}

impl Publisher {
    pub fn new(connection: Arc<ConnectionManager>, policy: RetryPolicy, prefix: impl Into<String>) -> Self {
        Self {
            connection,
            policy,
            prefix: prefix.into(),
            stream: None,
            stream_ready: AtomicBool::new(false),
        }
    }

    /// Create `descriptor` before the first publish if the broker does not have it yet
    pub fn with_stream(mut self, descriptor: StreamDescriptor) -> Self {
        self.stream = Some(descriptor);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Publish `payload` as JSON on `subject`
    ///
    /// Fails with [`MessagingError::RetriesExhausted`] after exactly `max_attempts`
    /// retryable failures; serialization errors fail immediately.
    pub async fn publish<T>(&self, subject: &str, payload: &T) -> Result<PublishAck, MessagingError>
    where
        T: QueueMessage + ?Sized,
    {
        let bytes = payload.to_bytes()?;
        let operation = format!("publish {subject}");

        let ack = self
            .policy
            .run(&operation, MessagingError::is_retryable, |attempt| {
                let bytes = bytes.clone();
                async move {
                    let provider = self.connection.connect().await?;
                    self.ensure_stream().await?;
                    debug!(subject, attempt, "Publishing message");
                    provider.publish(subject, bytes).await
                }
            })
            .await
            .map_err(|failure| {
                if failure.exhausted {
                    MessagingError::retries_exhausted(operation.as_str(), failure.attempts, failure.error)
                } else {
                    failure.error
                }
            })?;

        info!(
            subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Published message"
        );
        Ok(ack)
    }

    /// Publish a typed task on `<prefix>.tasks.<kind>`
    pub async fn publish_task<T: TaskPayload>(&self, task: &T) -> Result<PublishAck, MessagingError> {
        let subject = T::KIND.subject(&self.prefix);
        self.publish(&subject, task).await
    }

    /// Publish on a subject given relative to the namespace prefix (`tasks.rank`)
    pub async fn publish_relative<T>(&self, suffix: &str, payload: &T) -> Result<PublishAck, MessagingError>
    where
        T: QueueMessage + ?Sized,
    {
        let subject = qualify(&self.prefix, suffix);
        self.publish(&subject, payload).await
    }

    async fn ensure_stream(&self) -> Result<(), MessagingError> {
        let Some(descriptor) = &self.stream else {
            return Ok(());
        };
        if self.stream_ready.load(Ordering::Acquire) {
            return Ok(());
        }
        StreamReconciler::new(Arc::clone(&self.connection))
            .ensure_exists(descriptor)
            .await?;
        self.stream_ready.store(true, Ordering::Release);
        Ok(())
    }
}
