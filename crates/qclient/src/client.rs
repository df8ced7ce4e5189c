//! Driver contract, client registry and factory.

use crate::error::{QueueError, SerializationError};
use crate::message::{Message, QueueName, QueueRef, ReceiveOptions, SendOptions, SendResult};
use crate::provider::{ClientConfig, DriverKind};
use crate::providers::{AmqpDriver, AwsSqsDriver, InMemoryDriver};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

// ============================================================================
// Driver Contract
// ============================================================================

/// Operations every queue backend adapter implements
///
/// Each call runs to completion against the backend before returning; no
/// operation spawns background work. Adapters own their connection and are
/// safe to share between tasks.
#[async_trait]
pub trait QueueDriver: Send + Sync {
    /// Create a queue, succeeding if it already exists
    ///
    /// Drivers that cannot express `attributes` or `tags` fail with
    /// [`QueueError::UnsupportedOption`] when either is non-empty.
    async fn create_queue(
        &self,
        queue: &QueueName,
        attributes: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> Result<QueueRef, QueueError>;

    /// Report whether a queue exists
    ///
    /// A missing queue yields `Ok(false)`, never an error. Drivers without an
    /// existence query (AMQP) create the queue and report `true`.
    async fn does_queue_exist(&self, queue: &QueueName) -> Result<bool, QueueError>;

    /// Look up a queue by name
    ///
    /// `skip_cache` forces a fresh lookup. Drivers that cannot address queues
    /// by name fail with [`QueueError::NotSupported`].
    async fn get_queue_by_name(
        &self,
        queue: &QueueName,
        skip_cache: bool,
    ) -> Result<QueueRef, QueueError>;

    /// Remove all undelivered messages from a queue
    async fn purge_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Send a message body to a queue
    async fn send_message_to_queue(
        &self,
        queue: &QueueName,
        body: &Value,
        options: &SendOptions,
    ) -> Result<SendResult, QueueError>;

    /// Receive and acknowledge at most one message
    ///
    /// Returns `Ok(None)` when nothing arrives within the wait policy.
    async fn receive_message_from_queue(
        &self,
        queue: &QueueName,
        options: &ReceiveOptions,
    ) -> Result<Option<Message>, QueueError>;

    /// Receive and acknowledge up to `max_count` messages
    ///
    /// `max_count` is clamped to [`QueueDriver::max_batch_size`]. The default
    /// implementation repeats single receives and stops at the first empty
    /// one, so a partial batch is a normal result.
    ///
    /// An error is returned only when no message has been received. Once the
    /// batch holds a message, a failing receive ends the batch and is logged
    /// but not returned. A later call may not see that error again: an
    /// acknowledgement failure, for example, just leaves the message for
    /// redelivery.
    async fn receive_messages_from_queue(
        &self,
        queue: &QueueName,
        max_count: usize,
        options: &ReceiveOptions,
    ) -> Result<Vec<Message>, QueueError> {
        let limit = max_count.min(self.max_batch_size());
        let mut messages = Vec::with_capacity(limit);

        while messages.len() < limit {
            match self.receive_message_from_queue(queue, options).await {
                Ok(Some(message)) => messages.push(message),
                Ok(None) => break,
                Err(e) if messages.is_empty() => return Err(e),
                Err(e) => {
                    // Messages in hand are already acknowledged and must be
                    // returned; the error is only logged
                    warn!(
                        queue = %queue,
                        received = messages.len(),
                        error = %e,
                        "Receive failed part-way through batch; returning partial batch"
                    );
                    break;
                }
            }
        }

        debug!(queue = %queue, count = messages.len(), "Received message batch");
        Ok(messages)
    }

    /// Get driver kind
    fn driver_kind(&self) -> DriverKind;

    /// Get maximum number of messages one receive-many call returns
    fn max_batch_size(&self) -> usize {
        self.driver_kind().max_batch_size()
    }

    /// Release the backend connection
    ///
    /// Dropping the driver releases it as well; this lets callers observe
    /// shutdown errors.
    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

/// Typed helpers over the JSON body carried by [`QueueDriver`]
#[async_trait]
pub trait QueueDriverExt: QueueDriver {
    /// Serialize `body` and send it with default options
    async fn send<T>(&self, queue: &QueueName, body: &T) -> Result<SendResult, QueueError>
    where
        T: Serialize + Sync,
    {
        let value = serde_json::to_value(body).map_err(SerializationError::from)?;
        self.send_message_to_queue(queue, &value, &SendOptions::default())
            .await
    }

    /// Receive one message and deserialize its body
    async fn receive_as<T>(&self, queue: &QueueName) -> Result<Option<(T, Message)>, QueueError>
    where
        T: DeserializeOwned + Send,
    {
        match self
            .receive_message_from_queue(queue, &ReceiveOptions::default())
            .await?
        {
            Some(message) => {
                let typed = message.body_as()?;
                Ok(Some((typed, message)))
            }
            None => Ok(None),
        }
    }
}

impl<D: QueueDriver + ?Sized> QueueDriverExt for D {}

// ============================================================================
// Construction
// ============================================================================

/// Construct an uncached driver for the configured backend
pub async fn connect_driver(config: &ClientConfig) -> Result<Arc<dyn QueueDriver>, QueueError> {
    let driver = config.driver_or_default();
    info!(driver = %driver, "Connecting queue driver");

    let client: Arc<dyn QueueDriver> = match driver {
        DriverKind::AwsSqs => Arc::new(AwsSqsDriver::new(config).await?),
        DriverKind::Amqp => Arc::new(AmqpDriver::connect(config).await?),
        DriverKind::Memory => Arc::new(InMemoryDriver::new()),
    };

    Ok(client)
}

type Connector = Box<
    dyn Fn(ClientConfig) -> BoxFuture<'static, Result<Arc<dyn QueueDriver>, QueueError>>
        + Send
        + Sync,
>;

/// Keyed registry holding at most one driver per [`DriverKind`]
///
/// The first request for a driver constructs it; later requests for the same
/// driver return that instance whatever configuration they carry. Concurrent
/// first requests construct exactly once. A failed construction leaves the
/// slot empty so a later request can try again.
pub struct ClientRegistry {
    instances: Mutex<HashMap<DriverKind, Arc<OnceCell<Arc<dyn QueueDriver>>>>>,
    connector: Connector,
}

impl ClientRegistry {
    /// Create registry that connects real backends
    pub fn new() -> Self {
        Self::with_connector(|config| async move { connect_driver(&config).await })
    }

    /// Create registry with a custom construction function
    pub fn with_connector<F, Fut>(connector: F) -> Self
    where
        F: Fn(ClientConfig) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn QueueDriver>, QueueError>> + Send + 'static,
    {
        Self {
            instances: Mutex::new(HashMap::new()),
            connector: Box::new(move |config| Box::pin(connector(config))),
        }
    }

    /// Get the driver for the configured backend, constructing it on first use
    pub async fn get_instance(
        &self,
        config: &ClientConfig,
    ) -> Result<Arc<dyn QueueDriver>, QueueError> {
        let driver = config.driver_or_default();

        let slot = {
            let mut instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(instances.entry(driver).or_default())
        };

        let client = slot
            .get_or_try_init(|| {
                debug!(driver = %driver, "No cached driver instance; constructing");
                (self.connector)(config.clone())
            })
            .await?;

        Ok(Arc::clone(client))
    }

    /// Check whether a driver instance has been constructed
    pub fn contains(&self, driver: DriverKind) -> bool {
        let instances = self.instances.lock().unwrap_or_else(|e| e.into_inner());
        instances
            .get(&driver)
            .map(|slot| slot.initialized())
            .unwrap_or(false)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry behind [`QueueClientFactory`]
///
/// Populated lazily and never cleared; instances live until process exit.
static INSTANCES: LazyLock<ClientRegistry> = LazyLock::new(ClientRegistry::new);

/// Factory handing out process-wide queue clients
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Get the shared client for the configured driver
    ///
    /// A configuration without a driver selects [`DriverKind::DEFAULT`].
    pub async fn get_instance(config: &ClientConfig) -> Result<Arc<dyn QueueDriver>, QueueError> {
        INSTANCES.get_instance(config).await
    }

    /// Construct a client that bypasses the shared registry
    pub async fn connect(config: &ClientConfig) -> Result<Arc<dyn QueueDriver>, QueueError> {
        connect_driver(config).await
    }

    /// Create test client with in-memory driver
    pub fn create_test_client() -> Arc<dyn QueueDriver> {
        Arc::new(InMemoryDriver::new())
    }
}
