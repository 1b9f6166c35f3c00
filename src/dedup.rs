//! # Dedup Guard
//!
//! Per-process set of idempotency keys (URLs, content hashes, message ids).
//! Cleared on restart: redelivery after a crash must still be absorbed by the
//! downstream store, e.g. through a uniqueness constraint on the article URL.
//!
//! Keys claimed with [`DedupGuard::begin`] stay in flight until
//! [`DedupGuard::complete`]; only completed keys count as seen.

use dashmap::DashSet;

/// Result of [`DedupGuard::begin`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Caller owns the key and must call `complete` when done
    Acquired,
    /// Another task holds the key and has not finished yet
    InFlight,
    Completed,
}

#[derive(Debug, Default)]
pub struct DedupGuard {
    keys: DashSet<String>,
    in_flight: DashSet<String>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn mark(&self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    /// Mark `key` and report whether it had been seen before
    ///
    /// Atomic: of several tasks racing on the same key exactly one gets `false`.
    pub fn check_and_mark(&self, key: impl Into<String>) -> bool {
        !self.keys.insert(key.into())
    }

    /// Claim `key` for processing
    pub fn begin(&self, key: &str) -> Claim {
        if self.keys.contains(key) {
            return Claim::Completed;
        }
        if !self.in_flight.insert(key.to_string()) {
            return Claim::InFlight;
        }
        // the previous holder may have completed between the two checks
        if self.keys.contains(key) {
            self.in_flight.remove(key);
            return Claim::Completed;
        }
        Claim::Acquired
    }

    /// Mark a claimed key as done; later claims report [`Claim::Completed`]
    pub fn complete(&self, key: &str) {
        self.keys.insert(key.to_string());
        self.in_flight.remove(key);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
