//! Driver types and client configuration.

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Prefix for environment variables read by [`load_config`]
pub const ENV_PREFIX: &str = "QCLIENT";

/// Enumeration of supported queue drivers
///
/// Adding a backend means adding a variant here and a constructor arm in
/// [`crate::client::connect_driver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Cloud-hosted queue service addressed through the SQS query API
    AwsSqs,
    /// AMQP 0-9-1 message broker with implicit queue creation
    Amqp,
    /// Process-local queues for tests and development
    Memory,
}

impl DriverKind {
    /// Driver assumed when a configuration names none
    pub const DEFAULT: DriverKind = DriverKind::AwsSqs;

    /// Get the configuration key for this driver
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwsSqs => "aws_sqs",
            Self::Amqp => "amqp",
            Self::Memory => "memory",
        }
    }

    /// Whether the backend can answer "does this queue exist" without side effects
    pub fn has_native_existence_check(&self) -> bool {
        match self {
            Self::AwsSqs => true,
            Self::Amqp => false,
            Self::Memory => true,
        }
    }

    /// Largest number of messages one receive-many call will return
    pub fn max_batch_size(&self) -> usize {
        match self {
            Self::AwsSqs => 10,
            Self::Amqp => 10,
            Self::Memory => 10,
        }
    }

    /// Get maximum message body size for driver
    pub fn max_message_size(&self) -> usize {
        match self {
            Self::AwsSqs => 256 * 1024,
            Self::Amqp => 128 * 1024 * 1024,
            Self::Memory => 10 * 1024 * 1024,
        }
    }
}

impl Default for DriverKind {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws_sqs" | "sqs" => Ok(Self::AwsSqs),
            "amqp" | "rabbitmq" => Ok(Self::Amqp),
            "memory" | "in_memory" => Ok(Self::Memory),
            other => Err(ConfigurationError::UnknownDriver {
                name: other.to_string(),
            }),
        }
    }
}

/// Configuration for acquiring a queue client
///
/// Credential keys are driver specific:
/// - `aws_sqs`: `key_id`, `secret`, optional `session_token`
/// - `amqp`: `username`, `password`, optional `vhost`
#[derive(Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub driver: Option<DriverKind>,
    #[serde(default)]
    pub credentials: HashMap<String, String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub region: Option<String>,
}

impl ClientConfig {
    /// Create configuration for a specific driver
    pub fn new(driver: DriverKind) -> Self {
        Self {
            driver: Some(driver),
            ..Default::default()
        }
    }

    /// Resolve the driver, falling back to [`DriverKind::DEFAULT`]
    pub fn driver_or_default(&self) -> DriverKind {
        self.driver.unwrap_or_default()
    }

    /// Add a credential entry
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    /// Set backend host
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Set backend port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set cloud region
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Look up a credential, treating empty strings as absent
    pub fn credential(&self, key: &str) -> Option<&str> {
        self.credentials
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut credential_keys: Vec<&String> = self.credentials.keys().collect();
        credential_keys.sort();
        let redacted: Vec<String> = credential_keys
            .into_iter()
            .map(|k| format!("{}=<REDACTED>", k))
            .collect();

        f.debug_struct("ClientConfig")
            .field("driver", &self.driver)
            .field("credentials", &redacted)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("region", &self.region)
            .finish()
    }
}

/// Load client configuration from layered sources
///
/// Sources are applied in order, later ones overriding earlier ones:
/// 1. the file at `path`, when given (format inferred from the extension)
/// 2. environment variables prefixed `QCLIENT__`, e.g.
///    `QCLIENT__DRIVER=amqp` or `QCLIENT__CREDENTIALS__USERNAME=guest`
pub fn load_config(path: Option<&Path>) -> Result<ClientConfig, ConfigurationError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    let settings = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()
        .map_err(|e| ConfigurationError::Parsing {
            message: e.to_string(),
        })?;

    settings
        .try_deserialize()
        .map_err(|e| ConfigurationError::Parsing {
            message: e.to_string(),
        })
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
