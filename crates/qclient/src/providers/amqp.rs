//! AMQP 0-9-1 driver using `lapin`.
//!
//! Queues are implicit on an AMQP broker: declaring one is idempotent and
//! there is no side-effect-free existence query. The driver therefore
//! answers `does_queue_exist` by declaring the queue, and cannot look queues
//! up by name.
//!
//! One connection and one publisher-confirm channel are opened at
//! construction. The channel sits behind a mutex so a receive's get and ack
//! happen as one unit, and a channel closed by a broker exception (for
//! example a purge of a missing queue) is reopened on next use.

use crate::client::QueueDriver;
use crate::codec;
use crate::error::{ConfigurationError, QueueError, SerializationError};
use crate::message::{
    Message, MessageId, QueueName, QueueRef, ReceiptHandle, ReceiveOptions, SendOptions,
    SendResult,
};
use crate::provider::{ClientConfig, DriverKind};
use async_trait::async_trait;
use lapin::options::{
    BasicAckOptions, BasicGetOptions, BasicPublishOptions,
    ConfirmSelectOptions, QueueDeclareOptions, QueuePurgeOptions,
};
use lapin::protocol::{AMQPErrorKind, AMQPSoftError};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "amqp_tests.rs"]
mod tests;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 5672;
const DEFAULT_USERNAME: &str = "guest";
const DEFAULT_PASSWORD: &str = "guest";
const DEFAULT_VHOST: &str = "/";

/// AMQP delivery mode marking a message persistent
const PERSISTENT: u8 = 2;

// ============================================================================
// Connection Settings
// ============================================================================

/// Broker address and login resolved from a [`ClientConfig`]
#[derive(Clone, PartialEq)]
struct AmqpSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
    vhost: String,
}

impl AmqpSettings {
    fn from_config(config: &ClientConfig) -> Self {
        Self {
            host: config
                .host
                .clone()
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: config.port.unwrap_or(DEFAULT_PORT),
            username: config
                .credential("username")
                .unwrap_or(DEFAULT_USERNAME)
                .to_string(),
            password: config
                .credential("password")
                .unwrap_or(DEFAULT_PASSWORD)
                .to_string(),
            vhost: config
                .credential("vhost")
                .unwrap_or(DEFAULT_VHOST)
                .to_string(),
        }
    }

    /// Connection URI with every component percent-encoded
    fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            urlencoding::encode(&self.username),
            urlencoding::encode(&self.password),
            self.host,
            self.port,
            urlencoding::encode(&self.vhost)
        )
    }

    /// Locator for a queue on this broker
    fn locator(&self, queue: &QueueName) -> String {
        format!(
            "amqp://{}:{}/{}/{}",
            self.host,
            self.port,
            urlencoding::encode(&self.vhost),
            queue
        )
    }
}

impl fmt::Debug for AmqpSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<REDACTED>")
            .field("vhost", &self.vhost)
            .finish()
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Map a broker error onto the shared error taxonomy
fn map_lapin_error(error: lapin::Error, queue: &QueueName) -> QueueError {
    match error {
        lapin::Error::ProtocolError(amqp_error) => match amqp_error.kind() {
            AMQPErrorKind::Soft(AMQPSoftError::NOTFOUND) => QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            },
            AMQPErrorKind::Soft(AMQPSoftError::ACCESSREFUSED) => QueueError::AuthenticationFailed {
                message: amqp_error.to_string(),
            },
            AMQPErrorKind::Soft(AMQPSoftError::NOROUTE) => QueueError::UnroutableMessage {
                queue_name: queue.to_string(),
                reason: amqp_error.to_string(),
            },
            kind => QueueError::Backend {
                driver: DriverKind::Amqp,
                code: format!("{:?}", kind),
                message: amqp_error.to_string(),
            },
        },
        other => QueueError::TransportFailure {
            message: other.to_string(),
        },
    }
}

/// Fail on the first option this driver cannot honour
fn reject_send_options(options: &SendOptions) -> Result<(), QueueError> {
    match options.set_options().first() {
        Some(option) => Err(QueueError::unsupported_option(DriverKind::Amqp, option)),
        None => Ok(()),
    }
}

/// Fail on the first option this driver cannot honour
fn reject_receive_options(options: &ReceiveOptions) -> Result<(), QueueError> {
    match options.set_options().first() {
        Some(option) => Err(QueueError::unsupported_option(DriverKind::Amqp, option)),
        None => Ok(()),
    }
}

/// Decode a delivery body, keeping the raw bytes when it cannot be read
fn decode_delivery(message_id: &MessageId, data: &[u8]) -> Result<Value, SerializationError> {
    codec::decode(data).map_err(|e| match e {
        SerializationError::InvalidUtf8 => SerializationError::UndecodableBody {
            message_id: message_id.to_string(),
            body: data.to_vec(),
        },
        other => other,
    })
}

async fn open_channel(connection: &Connection) -> Result<Channel, lapin::Error> {
    let channel = connection.create_channel().await?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await?;
    Ok(channel)
}

// ============================================================================
// AMQP Driver
// ============================================================================

/// AMQP 0-9-1 queue driver
pub struct AmqpDriver {
    connection: Connection,
    channel: Mutex<Channel>,
    settings: AmqpSettings,
}

impl AmqpDriver {
    /// Connect to the broker and open a publisher-confirm channel
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Construction`] if the broker cannot be reached or
    /// rejects the login.
    pub async fn connect(config: &ClientConfig) -> Result<Self, QueueError> {
        let settings = AmqpSettings::from_config(config);

        let unreachable = |e: lapin::Error| {
            QueueError::Construction(ConfigurationError::Unreachable {
                driver: DriverKind::Amqp,
                message: e.to_string(),
            })
        };

        let connection = Connection::connect(&settings.uri(), ConnectionProperties::default())
            .await
            .map_err(unreachable)?;
        let channel = open_channel(&connection).await.map_err(unreachable)?;

        info!(host = %settings.host, port = settings.port, vhost = %settings.vhost, "Connected to AMQP broker");

        Ok(Self {
            connection,
            channel: Mutex::new(channel),
            settings,
        })
    }

    /// Lock the channel, reopening it if the broker closed it
    async fn channel(&self) -> Result<MutexGuard<'_, Channel>, QueueError> {
        let mut channel = self.channel.lock().await;

        if !channel.status().connected() {
            warn!("AMQP channel closed by broker; reopening");
            *channel = open_channel(&self.connection)
                .await
                .map_err(|e| QueueError::TransportFailure {
                    message: format!("failed to reopen channel: {}", e),
                })?;
        }

        Ok(channel)
    }

    async fn declare(&self, queue: &QueueName) -> Result<(), QueueError> {
        let channel = self.channel().await?;
        channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| map_lapin_error(e, queue))?;
        Ok(())
    }
}

impl fmt::Debug for AmqpDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmqpDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

#[async_trait]
impl QueueDriver for AmqpDriver {
    async fn create_queue(
        &self,
        queue: &QueueName,
        attributes: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> Result<QueueRef, QueueError> {
        if !attributes.is_empty() {
            return Err(QueueError::unsupported_option(DriverKind::Amqp, "attributes"));
        }
        if !tags.is_empty() {
            return Err(QueueError::unsupported_option(DriverKind::Amqp, "tags"));
        }

        self.declare(queue).await?;
        debug!(queue = %queue, "Queue declared");

        Ok(QueueRef::new(queue.clone(), self.settings.locator(queue)))
    }

    /// Declare the queue and report `true`
    ///
    /// **This creates the queue when it is missing.** AMQP has no
    /// side-effect-free existence check, so callers must not treat this as a
    /// pure read.
    async fn does_queue_exist(&self, queue: &QueueName) -> Result<bool, QueueError> {
        self.declare(queue).await?;
        Ok(true)
    }

    async fn get_queue_by_name(
        &self,
        _queue: &QueueName,
        _skip_cache: bool,
    ) -> Result<QueueRef, QueueError> {
        Err(QueueError::not_supported(DriverKind::Amqp, "get_queue_by_name"))
    }

    async fn purge_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        let channel = self.channel().await?;
        let purged = channel
            .queue_purge(queue.as_str(), QueuePurgeOptions::default())
            .await
            .map_err(|e| map_lapin_error(e, queue))?;

        debug!(queue = %queue, purged, "Queue purged");
        Ok(())
    }

    async fn send_message_to_queue(
        &self,
        queue: &QueueName,
        body: &Value,
        options: &SendOptions,
    ) -> Result<SendResult, QueueError> {
        reject_send_options(options)?;

        let wire = codec::encode(body)?;
        let max_size = DriverKind::Amqp.max_message_size();
        if wire.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: wire.len(),
                max_size,
            });
        }

        let message_id = MessageId::new();
        let properties = BasicProperties::default()
            .with_message_id(message_id.as_str().into())
            .with_content_type("application/json".into())
            .with_delivery_mode(PERSISTENT);

        let channel = self.channel().await?;
        let confirmation = channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                wire.as_bytes(),
                properties,
            )
            .await
            .map_err(|e| map_lapin_error(e, queue))?
            .await
            .map_err(|e| map_lapin_error(e, queue))?;

        match confirmation {
            Confirmation::Ack(Some(returned)) => {
                return Err(QueueError::UnroutableMessage {
                    queue_name: queue.to_string(),
                    reason: format!("{} {}", returned.reply_code, returned.reply_text.as_str()),
                })
            }
            Confirmation::Nack(_) => {
                return Err(QueueError::UnroutableMessage {
                    queue_name: queue.to_string(),
                    reason: "broker did not accept the message".to_string(),
                })
            }
            Confirmation::Ack(None) | Confirmation::NotRequested => {}
        }

        debug!(queue = %queue, message_id = %message_id, "Message published");
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
        reject_receive_options(options)?;

        let channel = self.channel().await?;
        let Some(delivery) = channel
            .basic_get(queue.as_str(), BasicGetOptions { no_ack: false })
            .await
            .map_err(|e| map_lapin_error(e, queue))?
        else {
            return Ok(None);
        };

        let delivery_tag = delivery.delivery.delivery_tag;
        let message_id = match delivery.delivery.properties.message_id() {
            Some(id) if !id.as_str().is_empty() => id.as_str().parse::<MessageId>()?,
            _ => MessageId::new(),
        };

        let body = decode_delivery(&message_id, &delivery.delivery.data);

        // Undecodable deliveries are acknowledged too; the error carries the raw body
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::AcknowledgementFailed {
                message_id: message_id.to_string(),
                reason: e.to_string(),
            })?;

        let body = match body {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    queue = %queue,
                    message_id = %message_id,
                    error = %e,
                    "Discarded undecodable message"
                );
                return Err(e.into());
            }
        };

        let redelivered = delivery.delivery.redelivered;
        let mut attributes = HashMap::new();
        attributes.insert("redelivered".to_string(), redelivered.to_string());
        if let Some(content_type) = delivery.delivery.properties.content_type() {
            attributes.insert("content_type".to_string(), content_type.as_str().to_string());
        }

        debug!(queue = %queue, message_id = %message_id, "Message received");
        Ok(Some(Message {
            id: message_id,
            queue: queue.clone(),
            body,
            attributes,
            receipt: ReceiptHandle::new(delivery_tag.to_string(), DriverKind::Amqp),
            // AMQP only flags redelivery; it does not count deliveries
            delivery_count: if redelivered { 2 } else { 1 },
        }))
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::Amqp
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.connection
            .close(200, "OK")
            .await
            .map_err(|e| QueueError::TransportFailure {
                message: e.to_string(),
            })?;
        info!("AMQP connection closed");
        Ok(())
    }
}
