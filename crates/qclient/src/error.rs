//! Error types for queue operations.

use crate::provider::DriverKind;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
///
/// Every backend-native failure is mapped onto one of these variants at the
/// adapter boundary, so callers can branch on the kind of failure rather than
/// on message text.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Option '{option}' is not supported by the {driver} driver")]
    UnsupportedOption { driver: DriverKind, option: String },

    #[error("Operation '{operation}' is not supported by the {driver} driver")]
    NotSupported {
        driver: DriverKind,
        operation: String,
    },

    #[error("Message to '{queue_name}' could not be routed: {reason}")]
    UnroutableMessage { queue_name: String, reason: String },

    #[error("Transport failure: {message}")]
    TransportFailure { message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Message '{message_id}' could not be acknowledged: {reason}")]
    AcknowledgementFailed { message_id: String, reason: String },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Backend error ({driver}): {code} - {message}")]
    Backend {
        driver: DriverKind,
        code: String,
        message: String,
    },

    #[error("Client construction failed: {0}")]
    Construction(#[from] ConfigurationError),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and the operation may succeed on retry
    ///
    /// The client never retries on its own; this only informs the caller's
    /// retry policy.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::QueueNotFound { .. } => false,
            Self::UnsupportedOption { .. } => false,
            Self::NotSupported { .. } => false,
            Self::UnroutableMessage { .. } => false,
            Self::TransportFailure { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::AcknowledgementFailed { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::Backend { .. } => false,
            Self::Construction(_) => false,
            Self::Serialization(_) => false,
            Self::Validation(_) => false,
        }
    }

    /// Get suggested retry delay
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::TransportFailure { .. } => Some(Duration::from_secs(5)),
            Self::AcknowledgementFailed { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    pub(crate) fn unsupported_option(driver: DriverKind, option: &str) -> Self {
        Self::UnsupportedOption {
            driver,
            option: option.to_string(),
        }
    }

    pub(crate) fn not_supported(driver: DriverKind, operation: &str) -> Self {
        Self::NotSupported {
            driver,
            operation: operation.to_string(),
        }
    }
}

/// Errors during message body serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,

    /// A delivery that was acknowledged but could not be decoded; the raw
    /// bytes are the only remaining copy
    #[error("Message {message_id} has an undecodable body ({} bytes)", .body.len())]
    UndecodableBody { message_id: String, body: Vec<u8> },

    #[error("Backend response could not be parsed: {message}")]
    MalformedResponse { message: String },
}

/// Configuration errors raised while constructing a driver
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },

    #[error("Unknown driver '{name}'")]
    UnknownDriver { name: String },

    #[error("Could not connect to {driver} backend: {message}")]
    Unreachable { driver: DriverKind, message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
