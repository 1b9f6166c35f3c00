//! # Database
//!
//! Pooled PostgreSQL access with SQLSTATE-aware retries.

pub mod error_codes;
pub mod store;

pub use error_codes::PgErrorCode;
pub use store::{mask_password, ErrorClass, RetryingStoreClient, StoreError};
