//! # Stream Reconciler
//!
//! Brings the broker's stream in line with a desired [`StreamDescriptor`]:
//!
//! 1. absent → create
//! 2. retention differs → delete and recreate (destroys unacknowledged messages)
//! 3. other drift → in-place update
//! 4. identical → nothing
//!
//! Any broker error while reading the current state is returned as-is; agents treat
//! it as fatal at startup because they cannot run without a known-good stream.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::connection::ConnectionManager;
use super::errors::MessagingError;
use super::service::StreamDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    /// Deleted and created again because retention changed
    Recreated,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct StreamReconciler {
    connection: Arc<ConnectionManager>,
}

impl StreamReconciler {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    pub async fn reconcile(
        &self,
        desired: &StreamDescriptor,
    ) -> Result<ReconcileOutcome, MessagingError> {
        let provider = self.connection.provider().await?;

        let Some(current) = provider.stream_info(&desired.name).await? else {
            provider.create_stream(desired).await?;
            info!(
                stream = %desired.name,
                subjects = ?desired.subjects,
                retention = ?desired.retention,
                "Created stream"
            );
            return Ok(ReconcileOutcome::Created);
        };

        if desired.requires_recreate(&current) {
            warn!(
                stream = %desired.name,
                current = ?current.retention,
                desired = ?desired.retention,
                "Retention policy changed; deleting and recreating stream, unacknowledged messages are lost"
            );
            provider.delete_stream(&desired.name).await?;
            provider.create_stream(desired).await?;
            return Ok(ReconcileOutcome::Recreated);
        }

        if current == *desired {
            debug!(stream = %desired.name, "Stream already up to date");
            return Ok(ReconcileOutcome::Unchanged);
        }

        provider.update_stream(desired).await?;
        info!(stream = %desired.name, "Updated stream configuration");
        Ok(ReconcileOutcome::Updated)
    }

    /// Create the stream if it is missing, never touching an existing one
    ///
    /// Returns true when the stream was created.
    pub async fn ensure_exists(&self, desired: &StreamDescriptor) -> Result<bool, MessagingError> {
        let provider = self.connection.provider().await?;
        if provider.stream_info(&desired.name).await?.is_some() {
            return Ok(false);
        }
        provider.create_stream(desired).await?;
        info!(stream = %desired.name, "Created missing stream");
        Ok(true)
    }
}
