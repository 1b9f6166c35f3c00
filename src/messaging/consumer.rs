//! # Consumer Manager
//!
//! Creates durable consumers and binds a handler to their deliveries.
//!
//! Consumer settings such as `max_deliver` cannot always be changed in place, so
//! `ensure` always deletes an existing consumer of the same durable name before
//! creating a fresh one ("not found" on delete counts as success). Each delivery is
//! handed to the handler on its own task; nothing here acknowledges messages.
//!
//! A delivery loop reports through [`LoopExit`] whether it was told to stop or
//! lost its stream, so an owner can re-establish lost bindings.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use super::errors::MessagingError;
use super::service::{ConsumerDescriptor, Delivery};

/// Receives every delivery of a subscription
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery);
}

/// Why a delivery loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Stop switch flipped: `unsubscribe`, `stop_all` or a newer binding of the durable
    Stopped,
    /// Delivery stream ended or the connection behind it was lost
    Ended,
}

/// Active binding between a durable consumer and a handler
#[derive(Debug)]
pub struct Subscription {
    pub stream: String,
    pub durable: String,
    pub subject: String,
    stop: Arc<watch::Sender<bool>>,
    task: JoinHandle<LoopExit>,
}

impl Subscription {
    /// Stop pulling deliveries; handler tasks already running are left to finish
    pub async fn unsubscribe(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!(durable = %self.durable, error = %e, "Delivery loop ended abnormally");
        }
        info!(stream = %self.stream, durable = %self.durable, "Unsubscribed");
    }

    /// Wait for the delivery loop to return on its own
    ///
    /// Consumes the subscription; a panicked loop counts as [`LoopExit::Ended`].
    pub async fn closed(self) -> LoopExit {
        match self.task.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(durable = %self.durable, error = %e, "Delivery loop ended abnormally");
                LoopExit::Ended
            }
        }
    }

    /// Stop switch that outlives a subscription moved into [`Subscription::closed`]
    pub(crate) fn stop_switch(&self) -> Arc<watch::Sender<bool>> {
        Arc::clone(&self.stop)
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

#[derive(Debug)]
pub struct ConsumerManager {
    connection: Arc<ConnectionManager>,
    /// Stop switches of live delivery loops, by `stream/durable`
    active: Mutex<HashMap<String, Arc<watch::Sender<bool>>>>,
}

impl ConsumerManager {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self {
            connection,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ensure(
        &self,
        stream: &str,
        descriptor: &ConsumerDescriptor,
        subject_filter: &str,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Subscription, MessagingError> {
        let provider = self.connection.connect().await?;
        let descriptor = descriptor.clone().with_filter_subject(subject_filter);
        let durable = descriptor.durable.clone();
        let key = format!("{stream}/{durable}");

        // a previous binding in this process must not keep pulling from a deleted consumer
        if let Some(previous) = self.active.lock().remove(&key) {
            let _ = previous.send(true);
        }

        if provider.delete_consumer(stream, &durable).await? {
            debug!(stream, durable = %durable, "Deleted existing consumer");
        }
        provider.create_consumer(stream, &descriptor).await?;
        let mut deliveries = provider.consume(stream, &durable).await?;

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let stop = Arc::new(stop_tx);
        self.active.lock().insert(key, Arc::clone(&stop));

        let loop_durable = durable.clone();
        let loop_provider = Arc::clone(&provider);
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break LoopExit::Stopped;
                        }
                    }
                    next = deliveries.next() => match next {
                        Some(Ok(delivery)) => {
                            let handler = Arc::clone(&handler);
                            tokio::spawn(async move { handler.handle(delivery).await });
                        }
                        Some(Err(e)) => {
                            warn!(durable = %loop_durable, error = %e, "Delivery stream error");
                            if !loop_provider.is_connected() {
                                break LoopExit::Ended;
                            }
                        }
                        None => {
                            warn!(durable = %loop_durable, "Delivery stream ended");
                            break LoopExit::Ended;
                        }
                    }
                }
            }
        });

        info!(
            stream,
            durable = %durable,
            subject = subject_filter,
            max_deliver = descriptor.max_deliver,
            "Subscribed durable consumer"
        );

        Ok(Subscription {
            stream: stream.to_string(),
            durable,
            subject: subject_filter.to_string(),
            stop,
            task,
        })
    }

    /// Signal every delivery loop started by this manager to stop
    pub fn stop_all(&self) {
        for (_, stop) in self.active.lock().drain() {
            let _ = stop.send(true);
        }
    }
}
