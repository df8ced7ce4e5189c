//! # qclient
//!
//! Uniform queue client over interchangeable message-queue backends.
//!
//! Application code performs seven operations (create, check existence,
//! fetch, purge, send, receive one, receive many) through the
//! [`QueueDriver`] trait and never touches a backend's native API.
//!
//! ## Module Organization
//!
//! - [`error`] - Error taxonomy shared by every driver
//! - [`message`] - Queue names, messages, receipts and per-call options
//! - [`provider`] - Driver kinds and client configuration
//! - [`client`] - Driver contract, registry and factory
//! - [`providers`] - Backend adapters (AWS SQS, AMQP, in-memory)
//! - [`codec`] - Wire encoding for message bodies
//!
//! ## Example
//!
//! ```no_run
//! use qclient::{ClientConfig, DriverKind, QueueClientFactory, QueueDriver, QueueName};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), qclient::QueueError> {
//! let config = ClientConfig::new(DriverKind::Memory);
//! let client = QueueClientFactory::get_instance(&config).await?;
//!
//! let queue = QueueName::new("orders")?;
//! client
//!     .create_queue(&queue, &Default::default(), &Default::default())
//!     .await?;
//! client
//!     .send_message_to_queue(&queue, &json!({ "id": 1 }), &Default::default())
//!     .await?;
//!
//! if let Some(message) = client
//!     .receive_message_from_queue(&queue, &Default::default())
//!     .await?
//! {
//!     println!("{}", message.body);
//! }
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod client;
pub mod codec;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use client::{connect_driver, ClientRegistry, QueueClientFactory, QueueDriver, QueueDriverExt};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{
    Message, MessageId, QueueName, QueueRef, ReceiptHandle, ReceiveOptions, SendOptions,
    SendResult,
};
pub use provider::{load_config, ClientConfig, DriverKind};
pub use providers::{AmqpDriver, AwsSqsDriver, InMemoryDriver};
