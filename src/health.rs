//! # Agent Health
//!
//! Readiness flag plus processed/error counters. HTTP liveness, readiness and
//! metrics endpoints live outside this crate and read [`HealthSnapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Running,
    NotReady,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub agent: String,
    pub status: HealthStatus,
    pub ready: bool,
    pub messages_processed: u64,
    pub errors: u64,
    pub last_message_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: i64,
}

#[derive(Debug)]
pub struct AgentHealth {
    name: String,
    status: RwLock<HealthStatus>,
    processed: AtomicU64,
    errors: AtomicU64,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
    started_at: DateTime<Utc>,
}

impl AgentHealth {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RwLock::new(HealthStatus::Starting),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_message_at: RwLock::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mark_ready(&self) {
        *self.status.write() = HealthStatus::Running;
        info!(agent = %self.name, "Agent marked ready");
    }

    pub fn mark_not_ready(&self) {
        *self.status.write() = HealthStatus::NotReady;
        info!(agent = %self.name, "Agent marked not ready");
    }

    pub fn increment_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    pub fn increment_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.read()
    }

    pub fn is_ready(&self) -> bool {
        self.status() == HealthStatus::Running
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let status = self.status();
        let now = Utc::now();
        HealthSnapshot {
            agent: self.name.clone(),
            status,
            ready: status == HealthStatus::Running,
            messages_processed: self.processed(),
            errors: self.errors(),
            last_message_at: *self.last_message_at.read(),
            started_at: self.started_at,
            uptime_seconds: (now - self.started_at).num_seconds(),
        }
    }
}
