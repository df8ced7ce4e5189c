//! # qclient CLI
//!
//! Command-line interface over the `qclient` library.
//!
//! Each subcommand maps onto one driver operation:
//! - `create`, `exists`, `get`, `purge` for queue management
//! - `send` and `receive` for messaging
//!
//! Results are written to stdout as JSON. Logs go to stderr so the output can
//! be piped.

use clap::{Parser, Subcommand};
use qclient::{
    load_config, ClientConfig, ConfigurationError, DriverKind, QueueClientFactory, QueueDriver,
    QueueError, QueueName, ReceiveOptions, SendOptions,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;

// ============================================================================
// CLI Structure
// ============================================================================

/// qclient - one interface over SQS, AMQP and in-memory queues
#[derive(Parser, Debug)]
#[command(name = "qclient")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Manage queues and move messages through a uniform queue client")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "QCLIENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Queue driver (aws_sqs, amqp, memory)
    #[arg(short, long, global = true)]
    pub driver: Option<String>,

    /// Backend host or endpoint
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Backend port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Region (SQS only)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Logging level
    #[arg(short, long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Enable JSON logging
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a queue, or confirm an existing one
    Create {
        /// Queue name
        queue: String,

        /// Backend attribute as KEY=VALUE (repeatable)
        #[arg(long = "attribute", value_parser = parse_key_value)]
        attributes: Vec<(String, String)>,

        /// Tag as KEY=VALUE (repeatable)
        #[arg(long = "tag", value_parser = parse_key_value)]
        tags: Vec<(String, String)>,
    },

    /// Report whether a queue exists
    Exists {
        /// Queue name
        queue: String,
    },

    /// Look up an existing queue
    Get {
        /// Queue name
        queue: String,

        /// Bypass any cached lookup
        #[arg(long)]
        skip_cache: bool,
    },

    /// Remove every message from a queue
    Purge {
        /// Queue name
        queue: String,
    },

    /// Send a JSON message
    Send {
        /// Queue name
        queue: String,

        /// Message body as JSON
        body: String,

        /// Delivery delay in seconds
        #[arg(long)]
        delay: Option<u64>,

        /// Message group (FIFO queues)
        #[arg(long)]
        group_id: Option<String>,

        /// Deduplication ID (FIFO queues)
        #[arg(long)]
        deduplication_id: Option<String>,
    },

    /// Receive and acknowledge messages
    Receive {
        /// Queue name
        queue: String,

        /// Maximum number of messages
        #[arg(short, long, default_value = "1")]
        max: usize,

        /// Long-poll wait in seconds
        #[arg(long)]
        wait: Option<u64>,

        /// Visibility timeout in seconds
        #[arg(long)]
        visibility_timeout: Option<u64>,
    },
}

/// Parse a `KEY=VALUE` argument
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Invalid argument: {arg} - {message}")]
    InvalidArgument { arg: String, message: String },

    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 1,
            Self::Queue(QueueError::Construction(_)) => 1,
            Self::Queue(_) => 2,
            Self::InvalidArgument { .. } => 3,
            Self::Output(_) => 4,
        }
    }
}

fn invalid(arg: &str, message: impl ToString) -> CliError {
    CliError::InvalidArgument {
        arg: arg.to_string(),
        message: message.to_string(),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    initialize_logging(&cli)?;

    let output = execute(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

/// Initialize logging on stderr based on CLI arguments
fn initialize_logging(cli: &Cli) -> Result<(), CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .map_err(|e| invalid("log-level", e))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if cli.json_logs {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    // A subscriber may already be installed when embedded
    if let Err(e) = result {
        debug!(error = %e, "Logging already initialized");
    }

    Ok(())
}

/// Resolve the client configuration: file and environment first, then flags
pub fn build_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(driver) = &cli.driver {
        config.driver = Some(driver.parse::<DriverKind>()?);
    }
    if let Some(host) = &cli.host {
        config = config.with_host(host.clone());
    }
    if let Some(port) = cli.port {
        config = config.with_port(port);
    }
    if let Some(region) = &cli.region {
        config = config.with_region(region.clone());
    }

    Ok(config)
}

/// Run the parsed command and return its JSON result
pub async fn execute(cli: Cli) -> Result<Value, CliError> {
    let config = build_config(&cli)?;
    let client = QueueClientFactory::get_instance(&config).await?;
    debug!(driver = %client.driver_kind(), "Queue client ready");

    let result = execute_command(client.as_ref(), cli.command).await;

    if let Err(e) = client.close().await {
        warn!(error = %e, "Failed to close queue client");
    }

    result
}

async fn execute_command(client: &dyn QueueDriver, command: Commands) -> Result<Value, CliError> {
    match command {
        Commands::Create {
            queue,
            attributes,
            tags,
        } => {
            let queue = queue_name(queue)?;
            let attributes: HashMap<String, String> = attributes.into_iter().collect();
            let tags: HashMap<String, String> = tags.into_iter().collect();
            let queue_ref = client.create_queue(&queue, &attributes, &tags).await?;
            Ok(serde_json::to_value(queue_ref)?)
        }
        Commands::Exists { queue } => {
            let queue = queue_name(queue)?;
            let exists = client.does_queue_exist(&queue).await?;
            Ok(json!({ "queue": queue, "exists": exists }))
        }
        Commands::Get { queue, skip_cache } => {
            let queue = queue_name(queue)?;
            let queue_ref = client.get_queue_by_name(&queue, skip_cache).await?;
            Ok(serde_json::to_value(queue_ref)?)
        }
        Commands::Purge { queue } => {
            let queue = queue_name(queue)?;
            client.purge_queue(&queue).await?;
            Ok(json!({ "queue": queue, "purged": true }))
        }
        Commands::Send {
            queue,
            body,
            delay,
            group_id,
            deduplication_id,
        } => {
            let queue = queue_name(queue)?;
            let body: Value = serde_json::from_str(&body).map_err(|e| invalid("body", e))?;

            let mut options = SendOptions::new();
            if let Some(delay) = delay {
                options = options.with_delay(Duration::from_secs(delay));
            }
            if let Some(group_id) = group_id {
                options = options.with_group_id(group_id);
            }
            if let Some(deduplication_id) = deduplication_id {
                options = options.with_deduplication_id(deduplication_id);
            }

            let sent = client.send_message_to_queue(&queue, &body, &options).await?;
            Ok(serde_json::to_value(sent)?)
        }
        Commands::Receive {
            queue,
            max,
            wait,
            visibility_timeout,
        } => {
            let queue = queue_name(queue)?;

            let mut options = ReceiveOptions::new();
            if let Some(wait) = wait {
                options = options.with_wait_time(Duration::from_secs(wait));
            }
            if let Some(timeout) = visibility_timeout {
                options = options.with_visibility_timeout(Duration::from_secs(timeout));
            }

            let messages = client
                .receive_messages_from_queue(&queue, max, &options)
                .await?;
            Ok(serde_json::to_value(messages)?)
        }
    }
}

fn queue_name(name: String) -> Result<QueueName, CliError> {
    QueueName::new(name).map_err(|e| invalid("queue", e))
}
