//! In-memory queue driver for testing and development.
//!
//! Queues live in process memory behind a lock and disappear with the
//! driver. Existence is native: a queue exists only after `create_queue`.
//! Receives remove the message immediately, matching the implicit
//! acknowledgement every driver performs.

use crate::client::QueueDriver;
use crate::codec;
use crate::error::QueueError;
use crate::message::{
    Message, MessageId, QueueName, QueueRef, ReceiptHandle, ReceiveOptions, SendOptions,
    SendResult,
};
use crate::provider::DriverKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Interval between polls while waiting for a message
const POLL_INTERVAL: Duration = Duration::from_millis(25);

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Internal queue state for a single queue
struct MemoryQueue {
    /// Pending messages in arrival order
    messages: VecDeque<StoredMessage>,
    created_at: DateTime<Utc>,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            created_at: Utc::now(),
        }
    }
}

/// A message stored in wire form
struct StoredMessage {
    message_id: MessageId,
    wire: String,
    enqueued_at: DateTime<Utc>,
}

// ============================================================================
// InMemoryDriver
// ============================================================================

/// In-memory queue driver
pub struct InMemoryDriver {
    storage: Arc<RwLock<HashMap<QueueName, MemoryQueue>>>,
}

impl InMemoryDriver {
    /// Create new driver with no queues
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of messages waiting in a queue, `None` if the queue does not exist
    pub fn queue_depth(&self, queue: &QueueName) -> Option<usize> {
        self.read().get(queue).map(|q| q.messages.len())
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<QueueName, MemoryQueue>> {
        self.storage.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<QueueName, MemoryQueue>> {
        self.storage.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn locator(queue: &QueueName) -> String {
        format!("memory://{}", queue)
    }

    fn not_found(queue: &QueueName) -> QueueError {
        QueueError::QueueNotFound {
            queue_name: queue.to_string(),
        }
    }

    /// Remove the head of the queue, if any
    fn try_pop(&self, queue: &QueueName) -> Result<Option<Message>, QueueError> {
        let mut storage = self.write();
        let state = storage.get_mut(queue).ok_or_else(|| Self::not_found(queue))?;

        let Some(stored) = state.messages.pop_front() else {
            return Ok(None);
        };

        let mut attributes = HashMap::new();
        attributes.insert("enqueued_at".to_string(), stored.enqueued_at.to_rfc3339());

        Ok(Some(Message {
            receipt: ReceiptHandle::new(uuid::Uuid::new_v4().to_string(), DriverKind::Memory),
            id: stored.message_id,
            queue: queue.clone(),
            body: codec::decode_str(&stored.wire),
            attributes,
            delivery_count: 1,
        }))
    }
}

impl Default for InMemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueDriver for InMemoryDriver {
    async fn create_queue(
        &self,
        queue: &QueueName,
        attributes: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> Result<QueueRef, QueueError> {
        if !attributes.is_empty() {
            return Err(QueueError::unsupported_option(DriverKind::Memory, "attributes"));
        }
        if !tags.is_empty() {
            return Err(QueueError::unsupported_option(DriverKind::Memory, "tags"));
        }

        let mut storage = self.write();
        let state = storage.entry(queue.clone()).or_insert_with(MemoryQueue::new);
        debug!(queue = %queue, created_at = %state.created_at, "Queue ready");

        Ok(QueueRef::new(queue.clone(), Self::locator(queue)))
    }

    async fn does_queue_exist(&self, queue: &QueueName) -> Result<bool, QueueError> {
        Ok(self.read().contains_key(queue))
    }

    async fn get_queue_by_name(
        &self,
        queue: &QueueName,
        _skip_cache: bool,
    ) -> Result<QueueRef, QueueError> {
        if self.read().contains_key(queue) {
            Ok(QueueRef::new(queue.clone(), Self::locator(queue)))
        } else {
            Err(Self::not_found(queue))
        }
    }

    async fn purge_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let mut storage = self.write();
        let state = storage.get_mut(queue).ok_or_else(|| Self::not_found(queue))?;

        let purged = state.messages.len();
        state.messages.clear();
        debug!(queue = %queue, purged, "Queue purged");
        Ok(())
    }

    async fn send_message_to_queue(
        &self,
        queue: &QueueName,
        body: &Value,
        options: &SendOptions,
    ) -> Result<SendResult, QueueError> {
        if let Some(option) = options.set_options().first() {
            return Err(QueueError::unsupported_option(DriverKind::Memory, option));
        }

        let wire = codec::encode(body)?;
        let max_size = DriverKind::Memory.max_message_size();
        if wire.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: wire.len(),
                max_size,
            });
        }

        let message_id = MessageId::new();
        {
            let mut storage = self.write();
            let state = storage.get_mut(queue).ok_or_else(|| Self::not_found(queue))?;
            state.messages.push_back(StoredMessage {
                message_id: message_id.clone(),
                wire,
                enqueued_at: Utc::now(),
            });
        }

        debug!(queue = %queue, message_id = %message_id, "Message sent");
        Ok(SendResult {
            message_id,
            body: body.clone(),
        })
    }

    async fn receive_message_from_queue(
        &self,
        queue: &QueueName,
        options: &ReceiveOptions,
    ) -> Result<Option<Message>, QueueError> {
        if options.visibility_timeout.is_some() {
            return Err(QueueError::unsupported_option(
                DriverKind::Memory,
                "visibility_timeout",
            ));
        }

        let deadline = Instant::now() + options.wait_time.unwrap_or(Duration::ZERO);
        loop {
            if let Some(message) = self.try_pop(queue)? {
                debug!(queue = %queue, message_id = %message.id, "Message received");
                return Ok(Some(message));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Memory
    }
}
