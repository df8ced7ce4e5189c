//! Message types for queue operations including core domain identifiers.

use crate::error::{SerializationError, ValidationError};
use crate::provider::DriverKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Longest queue name (the AMQP short-string limit)
pub const MAX_QUEUE_NAME_LENGTH: usize = 255;

const FIFO_SUFFIX: &str = ".fifo";

/// Non-empty queue name of bounded length
///
/// Character rules differ between backends, so they are checked by the
/// driver that imposes them. SQS, for example, rejects dots outside a
/// trailing `.fifo`, while AMQP accepts names like `orders.created`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();

        if name.is_empty() {
            return Err(ValidationError::Required {
                field: "queue_name".to_string(),
            });
        }

        if name.len() > MAX_QUEUE_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: format!("must be at most {} bytes", MAX_QUEUE_NAME_LENGTH),
            });
        }

        Ok(Self(name))
    }

    /// Check if the name designates a FIFO queue
    pub fn is_fifo(&self) -> bool {
        self.0.ends_with(FIFO_SUFFIX)
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier assigned to a message by the backend (or by the adapter when
/// the backend has no notion of one)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

// ============================================================================
// Queue and Message Types
// ============================================================================

/// Opaque handle identifying a queue on its backend
///
/// The backend stays the source of truth; a reference may go stale if the
/// queue is deleted out of band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueRef {
    name: QueueName,
    locator: String,
}

impl QueueRef {
    /// Create new queue reference
    pub fn new(name: QueueName, locator: impl Into<String>) -> Self {
        Self {
            name,
            locator: locator.into(),
        }
    }

    /// Get the queue name
    pub fn name(&self) -> &QueueName {
        &self.name
    }

    /// Get the backend-specific locator (queue URL for SQS)
    pub fn locator(&self) -> &str {
        &self.locator
    }
}

/// Token the backend issued with a delivery
///
/// Receives acknowledge before returning, so the handle is informational: it
/// records which delivery the message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiptHandle {
    handle: String,
    driver: DriverKind,
}

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: impl Into<String>, driver: DriverKind) -> Self {
        Self {
            handle: handle.into(),
            driver,
        }
    }

    /// Get handle string
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// Get the driver that issued the handle
    pub fn driver(&self) -> DriverKind {
        self.driver
    }
}

/// A message received from a queue
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub queue: QueueName,
    pub body: Value,
    pub attributes: HashMap<String, String>,
    pub receipt: ReceiptHandle,
    pub delivery_count: u32,
}

impl Message {
    /// Deserialize the body into a typed value
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// Outcome of a successful send
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendResult {
    pub message_id: MessageId,
    pub body: Value,
}

// ============================================================================
// Send and Receive Options
// ============================================================================

/// Options for sending messages
///
/// Not every driver honours every option. A driver that cannot honour a set
/// option fails the send with `QueueError::UnsupportedOption` instead of
/// ignoring it.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Delay before the message becomes visible
    pub delay: Option<Duration>,
    /// Ordering group for FIFO queues
    pub group_id: Option<String>,
    /// Deduplication token for FIFO queues
    pub deduplication_id: Option<String>,
    /// String message attributes carried alongside the body
    pub attributes: HashMap<String, String>,
}

impl SendOptions {
    /// Create new send options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set delivery delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Set FIFO ordering group
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Set FIFO deduplication token
    pub fn with_deduplication_id(mut self, id: impl Into<String>) -> Self {
        self.deduplication_id = Some(id.into());
        self
    }

    /// Add a message attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Names of the options that carry a value
    pub fn set_options(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.delay.is_some() {
            set.push("delay");
        }
        if self.group_id.is_some() {
            set.push("group_id");
        }
        if self.deduplication_id.is_some() {
            set.push("deduplication_id");
        }
        if !self.attributes.is_empty() {
            set.push("attributes");
        }
        set
    }
}

/// Options for receiving messages
#[derive(Debug, Clone, Default)]
pub struct ReceiveOptions {
    /// How long a delivered-but-unacknowledged message stays hidden
    pub visibility_timeout: Option<Duration>,
    /// How long to wait for a message before returning empty
    pub wait_time: Option<Duration>,
}

impl ReceiveOptions {
    /// Create new receive options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = Some(timeout);
        self
    }

    /// Set long-poll wait time
    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = Some(wait);
        self
    }

    /// Names of the options that carry a value
    pub fn set_options(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.visibility_timeout.is_some() {
            set.push("visibility_timeout");
        }
        if self.wait_time.is_some() {
            set.push("wait_time");
        }
        set
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
