//! # Resilience
//!
//! A single retry abstraction applied uniformly to connect, publish, subscribe and
//! store operations instead of hand-rolled sleep loops at every call site.

pub mod retry;

pub use retry::{Backoff, RetryFailure, RetryPolicy};
