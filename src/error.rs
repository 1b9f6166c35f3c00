//! # Crate Error Types
//!
//! Top-level error returned by agent bootstrap and the binaries. Each layer keeps its
//! own error enum ([`MessagingError`], [`StoreError`]); this type only aggregates them.

use thiserror::Error;

use crate::database::StoreError;
use crate::messaging::MessagingError;

#[derive(Error, Debug)]
pub enum RadarError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Startup could not reach a known-good state; the agent must exit
    #[error("Startup aborted in {component}: {message}")]
    Startup { component: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RadarError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn startup(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Startup {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the agent should exit instead of carrying on
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Configuration { .. } | Self::ConfigSource(_) | Self::Startup { .. } => true,
            Self::Store(e) => e.is_fatal(),
            Self::Messaging(e) => !e.is_retryable(),
            Self::Io(_) => false,
        }
    }
}

pub type RadarResult<T> = Result<T, RadarError>;
