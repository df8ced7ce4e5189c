//! AWS SQS driver using the SQS query API over HTTP.
//!
//! Requests are form-encoded `POST`s signed with AWS Signature V4 and
//! responses are XML. Talking HTTP directly keeps the driver testable
//! against a mock server and lets the endpoint point at LocalStack or any
//! other SQS-compatible service.
//!
//! ## Receive semantics
//!
//! SQS only hides a received message for its visibility timeout. Every
//! receive therefore deletes what it got with `DeleteMessageBatch` before
//! returning, so a message handed to the caller is gone from the queue.
//!
//! ## Credentials
//!
//! Taken from the `key_id`, `secret` and optional `session_token` credential
//! entries. When neither key nor secret is configured the standard
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and `AWS_SESSION_TOKEN`
//! variables are used. The region comes from the configuration, then
//! `AWS_REGION`, then `AWS_DEFAULT_REGION`.

use crate::client::QueueDriver;
use crate::codec;
use crate::error::{ConfigurationError, QueueError, SerializationError, ValidationError};
use crate::message::{
    Message, MessageId, QueueName, QueueRef, ReceiptHandle, ReceiveOptions, SendOptions,
    SendResult,
};
use crate::provider::{ClientConfig, DriverKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client as HttpClient;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "aws_tests.rs"]
mod tests;

const API_VERSION: &str = "2012-11-05";

/// Longest delay SQS accepts on a send
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Longest long-poll wait SQS accepts on a receive
pub const MAX_WAIT_TIME: Duration = Duration::from_secs(20);

/// Longest visibility timeout SQS accepts
pub const MAX_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(12 * 60 * 60);

/// Longest queue name SQS accepts, including any `.fifo` suffix
pub const MAX_QUEUE_NAME_LENGTH: usize = 80;

const FIFO_SUFFIX: &str = ".fifo";

const NOT_FOUND_CODES: &[&str] = &["AWS.SimpleQueueService.NonExistentQueue", "QueueDoesNotExist"];

const AUTH_CODES: &[&str] = &[
    "AccessDenied",
    "AccessDeniedException",
    "ExpiredToken",
    "IncompleteSignature",
    "InvalidClientTokenId",
    "InvalidSecurity",
    "MissingAuthenticationToken",
    "SignatureDoesNotMatch",
    "UnrecognizedClientException",
];

const TRANSIENT_CODES: &[&str] = &[
    "AWS.SimpleQueueService.PurgeQueueInProgress",
    "PurgeQueueInProgress",
    "InternalError",
    "InternalFailure",
    "RequestThrottled",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
];

// ============================================================================
// Error Types
// ============================================================================

/// Failures of a single SQS request, before queue context is attached
#[derive(Debug, thiserror::Error)]
enum AwsError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transient service error {code}: {message}")]
    Transient { code: String, message: String },

    #[error("Queue does not exist")]
    QueueNotFound,

    #[error("Service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl AwsError {
    /// Map to the shared error taxonomy
    fn into_queue_error(self, queue: &QueueName) -> QueueError {
        match self {
            Self::Authentication(message) => QueueError::AuthenticationFailed { message },
            Self::Network(message) => QueueError::TransportFailure { message },
            Self::Transient { code, message } => QueueError::TransportFailure {
                message: format!("{}: {}", code, message),
            },
            Self::QueueNotFound => QueueError::QueueNotFound {
                queue_name: queue.to_string(),
            },
            Self::Service { code, message } => QueueError::Backend {
                driver: DriverKind::AwsSqs,
                code,
                message,
            },
            Self::MalformedResponse(message) => {
                QueueError::Serialization(SerializationError::MalformedResponse { message })
            }
        }
    }
}

/// Classify an SQS error response
fn classify_error(code: &str, message: &str, status_code: u16) -> AwsError {
    if NOT_FOUND_CODES.contains(&code) {
        AwsError::QueueNotFound
    } else if AUTH_CODES.contains(&code) || status_code == 401 || status_code == 403 {
        AwsError::Authentication(format!("{}: {}", code, message))
    } else if TRANSIENT_CODES.contains(&code) || status_code >= 500 {
        AwsError::Transient {
            code: code.to_string(),
            message: message.to_string(),
        }
    } else {
        AwsError::Service {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// AWS Signature V4 Signing
// ============================================================================

type HmacSha256 = Hmac<Sha256>;

/// AWS Signature Version 4 signer for request authentication
///
/// 1. Create canonical request (method, URI, query, headers, payload)
/// 2. Create string to sign (algorithm, timestamp, scope, request hash)
/// 3. Derive signing key (4-level HMAC chain)
/// 4. Calculate signature and build Authorization header
#[derive(Clone)]
struct AwsV4Signer {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl AwsV4Signer {
    fn new(credentials: AwsCredentials, region: String) -> Self {
        Self {
            access_key: credentials.access_key,
            secret_key: credentials.secret_key,
            session_token: credentials.session_token,
            region,
            service: "sqs".to_string(),
        }
    }

    /// Sign a `POST /` request, returning the headers to attach
    ///
    /// `host` must be the exact `Host` header value the request is sent with,
    /// including a non-default port.
    fn sign_request(
        &self,
        host: &str,
        body: &str,
        timestamp: &DateTime<Utc>,
    ) -> Vec<(&'static str, String)> {
        let date_stamp = timestamp.format("%Y%m%d").to_string();
        let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();

        let mut canonical_headers = format!("host:{}\nx-amz-date:{}\n", host, amz_date);
        let mut signed_headers = String::from("host;x-amz-date");
        if let Some(token) = &self.session_token {
            canonical_headers.push_str(&format!("x-amz-security-token:{}\n", token));
            signed_headers.push_str(";x-amz-security-token");
        }

        let payload_hash = hex::encode(Sha256::digest(body.as_bytes()));

        // Empty third line: no query string
        let canonical_request = format!(
            "POST\n/\n\n{}\n{}\n{}",
            canonical_headers, signed_headers, payload_hash
        );

        let algorithm = "AWS4-HMAC-SHA256";
        let credential_scope = format!(
            "{}/{}/{}/aws4_request",
            date_stamp, self.region, self.service
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n{}",
            algorithm,
            amz_date,
            credential_scope,
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let signing_key = self.signing_key(&date_stamp);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            algorithm, self.access_key, credential_scope, signed_headers, signature
        );

        let mut headers = vec![("authorization", authorization), ("x-amz-date", amz_date)];
        if let Some(token) = &self.session_token {
            headers.push(("x-amz-security-token", token.clone()));
        }
        headers
    }

    /// Derive the signing key
    ///
    /// kSecret = "AWS4" + secret, then HMAC over date, region, service and
    /// the literal "aws4_request" in turn.
    fn signing_key(&self, date_stamp: &str) -> Vec<u8> {
        let k_secret = format!("AWS4{}", self.secret_key);
        let k_date = hmac_sha256(k_secret.as_bytes(), date_stamp.as_bytes());
        let k_region = hmac_sha256(&k_date, self.region.as_bytes());
        let k_service = hmac_sha256(&k_region, self.service.as_bytes());
        hmac_sha256(&k_service, b"aws4_request")
    }
}

/// Compute HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

// ============================================================================
// Settings Resolution
// ============================================================================

struct AwsCredentials {
    access_key: String,
    secret_key: String,
    session_token: Option<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn resolve_region(config: &ClientConfig) -> Result<String, ConfigurationError> {
    config
        .region
        .clone()
        .filter(|r| !r.is_empty())
        .or_else(|| env_var("AWS_REGION"))
        .or_else(|| env_var("AWS_DEFAULT_REGION"))
        .ok_or_else(|| ConfigurationError::Missing {
            key: "region".to_string(),
        })
}

fn resolve_credentials(config: &ClientConfig) -> Result<AwsCredentials, ConfigurationError> {
    let configured = config.credential("key_id").is_some() || config.credential("secret").is_some();

    let (access_key, secret_key, session_token) = if configured {
        (
            config.credential("key_id").map(str::to_string),
            config.credential("secret").map(str::to_string),
            config.credential("session_token").map(str::to_string),
        )
    } else {
        (
            env_var("AWS_ACCESS_KEY_ID"),
            env_var("AWS_SECRET_ACCESS_KEY"),
            env_var("AWS_SESSION_TOKEN"),
        )
    };

    let access_key = access_key.ok_or_else(|| ConfigurationError::Missing {
        key: "credentials.key_id".to_string(),
    })?;
    let secret_key = secret_key.ok_or_else(|| ConfigurationError::Missing {
        key: "credentials.secret".to_string(),
    })?;

    Ok(AwsCredentials {
        access_key,
        secret_key,
        session_token,
    })
}

/// Build the service endpoint
///
/// `host` may carry a scheme (`http://localhost:4566`); without one HTTPS is
/// assumed. `port` overrides any port in `host`.
fn resolve_endpoint(config: &ClientConfig, region: &str) -> Result<Url, ConfigurationError> {
    let raw = match &config.host {
        Some(host) if host.contains("://") => host.clone(),
        Some(host) => format!("https://{}", host),
        None => format!("https://sqs.{}.amazonaws.com", region),
    };

    let mut endpoint = Url::parse(&raw).map_err(|e| ConfigurationError::Invalid {
        message: format!("invalid SQS endpoint '{}': {}", raw, e),
    })?;

    if let Some(port) = config.port {
        endpoint
            .set_port(Some(port))
            .map_err(|_| ConfigurationError::Invalid {
                message: format!("cannot set port {} on endpoint '{}'", port, raw),
            })?;
    }

    Ok(endpoint)
}

/// `Host` header value for an endpoint
fn host_header(endpoint: &Url) -> Result<String, ConfigurationError> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| ConfigurationError::Invalid {
            message: format!("SQS endpoint '{}' has no host", endpoint),
        })?;

    Ok(match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

// ============================================================================
// Response Parsing
// ============================================================================

/// Message fields pulled out of a `ReceiveMessage` response
#[derive(Debug, Default)]
struct RawMessage {
    message_id: Option<String>,
    receipt_handle: Option<String>,
    body: Option<String>,
    attributes: HashMap<String, String>,
}

/// Failed entry of a `DeleteMessageBatch` response
#[derive(Debug, PartialEq)]
struct BatchFailure {
    id: String,
    code: String,
    message: String,
}

fn xml_reader(xml: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    reader
}

fn xml_error(e: quick_xml::Error) -> AwsError {
    AwsError::MalformedResponse(format!("XML parsing error: {}", e))
}

/// Text of the first element named `tag`
fn parse_element_text(xml: &str, tag: &str) -> Result<Option<String>, AwsError> {
    let mut reader = xml_reader(xml);
    let mut inside = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == tag.as_bytes() => inside = true,
            Ok(Event::Text(e)) if inside => {
                let text = e.unescape().map_err(xml_error)?;
                return Ok(Some(text.into_owned()));
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == tag.as_bytes() => {
                return Ok(Some(String::new()));
            }
            Ok(Event::Eof) => return Ok(None),
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }
}

/// Extract `Code` and `Message` from an error response
fn parse_error_response(xml: &str) -> (String, String) {
    let code = parse_element_text(xml, "Code")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown".to_string());
    let message = parse_element_text(xml, "Message")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Unknown error".to_string());
    (code, message)
}

fn parse_receive_message_response(xml: &str) -> Result<Vec<RawMessage>, AwsError> {
    let mut reader = xml_reader(xml);
    let mut path: Vec<String> = Vec::new();
    let mut messages = Vec::new();
    let mut current = RawMessage::default();
    let mut attribute: (Option<String>, Option<String>) = (None, None);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "Message" => current = RawMessage::default(),
                    "Attribute" | "MessageAttribute" => attribute = (None, None),
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(e)) => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                let depth = path.len();
                let leaf = path.last().map(String::as_str);
                let parent = depth.checked_sub(2).map(|i| path[i].as_str());
                let grandparent = depth.checked_sub(3).map(|i| path[i].as_str());

                match (grandparent, parent, leaf) {
                    (_, Some("Message"), Some("MessageId")) => current.message_id = Some(text),
                    (_, Some("Message"), Some("ReceiptHandle")) => {
                        current.receipt_handle = Some(text)
                    }
                    (_, Some("Message"), Some("Body")) => current.body = Some(text),
                    (_, Some("Attribute" | "MessageAttribute"), Some("Name")) => {
                        attribute.0 = Some(text)
                    }
                    (_, Some("Attribute"), Some("Value")) => attribute.1 = Some(text),
                    (Some("MessageAttribute"), Some("Value"), Some("StringValue")) => {
                        attribute.1 = Some(text)
                    }
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) => {
                match e.name().as_ref() {
                    b"Attribute" | b"MessageAttribute" => {
                        if let (Some(name), Some(value)) = (attribute.0.take(), attribute.1.take())
                        {
                            current.attributes.insert(name, value);
                        }
                    }
                    b"Message" => messages.push(std::mem::take(&mut current)),
                    _ => {}
                }
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

fn parse_delete_batch_response(xml: &str) -> Result<Vec<BatchFailure>, AwsError> {
    let mut reader = xml_reader(xml);
    let mut failures = Vec::new();
    let mut in_failure = false;
    let mut field: Option<Vec<u8>> = None;
    let mut entry: (String, String, String) = Default::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                if e.name().as_ref() == b"BatchResultErrorEntry" {
                    in_failure = true;
                    entry = Default::default();
                } else if in_failure {
                    field = Some(e.name().as_ref().to_vec());
                }
            }
            Ok(Event::Text(e)) if in_failure => {
                let text = e.unescape().map_err(xml_error)?.into_owned();
                match field.as_deref() {
                    Some(b"Id") => entry.0 = text,
                    Some(b"Code") => entry.1 = text,
                    Some(b"Message") => entry.2 = text,
                    _ => {}
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"BatchResultErrorEntry" => {
                in_failure = false;
                let (id, code, message) = std::mem::take(&mut entry);
                failures.push(BatchFailure { id, code, message });
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(failures)
}

// ============================================================================
// AWS SQS Driver
// ============================================================================

/// AWS SQS queue driver
///
/// Thread-safe; share it across tasks with `Arc`. The queue URL cache is
/// protected by an async `RwLock`.
pub struct AwsSqsDriver {
    http_client: HttpClient,
    signer: AwsV4Signer,
    endpoint: Url,
    host: String,
    queue_url_cache: Arc<RwLock<HashMap<QueueName, String>>>,
}

impl AwsSqsDriver {
    /// Create new SQS driver
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Construction`] if the region or credentials
    /// cannot be resolved, or the endpoint is not a valid URL.
    pub async fn new(config: &ClientConfig) -> Result<Self, QueueError> {
        let region = resolve_region(config)?;
        let credentials = resolve_credentials(config)?;
        let endpoint = resolve_endpoint(config, &region)?;
        let host = host_header(&endpoint)?;

        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(30) + MAX_WAIT_TIME)
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("failed to create HTTP client: {}", e),
            })?;

        debug!(endpoint = %endpoint, region = %region, "SQS driver configured");

        Ok(Self {
            http_client,
            signer: AwsV4Signer::new(credentials, region),
            endpoint,
            host,
            queue_url_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Send a signed query API request and return the response body
    async fn make_request(
        &self,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<String, AwsError> {
        let body = std::iter::once(("Action".to_string(), action.to_string()))
            .chain(std::iter::once(("Version".to_string(), API_VERSION.to_string())))
            .chain(params)
            .map(|(k, v)| format!("{}={}", urlencoding::encode(&k), urlencoding::encode(&v)))
            .collect::<Vec<_>>()
            .join("&");

        let headers = self.signer.sign_request(&self.host, &body, &Utc::now());

        let mut request = self
            .http_client
            .post(self.endpoint.clone())
            .header(
                "content-type",
                "application/x-www-form-urlencoded; charset=utf-8",
            )
            .body(body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AwsError::Network(format!("Request timeout: {}", e))
            } else if e.is_connect() {
                AwsError::Network(format!("Connection failed: {}", e))
            } else {
                AwsError::Network(format!("HTTP request failed: {}", e))
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| AwsError::Network(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let (code, message) = parse_error_response(&response_body);
            debug!(action, status = status.as_u16(), code = %code, "SQS request rejected");
            return Err(classify_error(&code, &message, status.as_u16()));
        }

        Ok(response_body)
    }

    /// Resolve a queue URL, consulting the cache unless `skip_cache` is set
    async fn get_queue_url(&self, queue: &QueueName, skip_cache: bool) -> Result<String, AwsError> {
        if !skip_cache {
            let cache = self.queue_url_cache.read().await;
            if let Some(url) = cache.get(queue) {
                return Ok(url.clone());
            }
        }

        let response = self
            .make_request(
                "GetQueueUrl",
                vec![("QueueName".to_string(), queue.as_str().to_string())],
            )
            .await?;

        let queue_url = parse_element_text(&response, "QueueUrl")?
            .ok_or_else(|| AwsError::MalformedResponse("QueueUrl not found in response".into()))?;

        self.queue_url_cache
            .write()
            .await
            .insert(queue.clone(), queue_url.clone());

        Ok(queue_url)
    }

    /// Map a request failure, dropping any cached URL for a vanished queue
    async fn fail(&self, queue: &QueueName, error: AwsError) -> QueueError {
        if matches!(error, AwsError::QueueNotFound) {
            self.queue_url_cache.write().await.remove(queue);
        }
        error.into_queue_error(queue)
    }

    /// One `ReceiveMessage` call followed by deletion of everything received
    ///
    /// Messages whose deletion failed are withheld; they become visible again
    /// once their visibility timeout lapses. An error is returned only when
    /// nothing was deleted.
    async fn receive_batch(
        &self,
        queue: &QueueName,
        max_messages: usize,
        wait_time: Duration,
        visibility_timeout: Option<Duration>,
    ) -> Result<Vec<Message>, QueueError> {
        let queue_url = match self.get_queue_url(queue, false).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(queue, e).await),
        };

        let mut params = vec![
            ("QueueUrl".to_string(), queue_url.clone()),
            ("MaxNumberOfMessages".to_string(), max_messages.to_string()),
            ("WaitTimeSeconds".to_string(), wait_time.as_secs().to_string()),
            ("AttributeName.1".to_string(), "All".to_string()),
            ("MessageAttributeName.1".to_string(), "All".to_string()),
        ];
        if let Some(timeout) = visibility_timeout {
            params.push(("VisibilityTimeout".to_string(), timeout.as_secs().to_string()));
        }

        let response = match self.make_request("ReceiveMessage", params).await {
            Ok(body) => body,
            Err(e) => return Err(self.fail(queue, e).await),
        };
        let raw_messages =
            parse_receive_message_response(&response).map_err(|e| e.into_queue_error(queue))?;

        let mut messages = Vec::with_capacity(raw_messages.len());
        for raw in raw_messages {
            let (Some(message_id), Some(receipt_handle)) = (raw.message_id, raw.receipt_handle)
            else {
                return Err(QueueError::Serialization(
                    SerializationError::MalformedResponse {
                        message: "received message without MessageId or ReceiptHandle"
                            .to_string(),
                    },
                ));
            };

            let delivery_count = raw
                .attributes
                .get("ApproximateReceiveCount")
                .and_then(|c| c.parse().ok())
                .unwrap_or(1);

            messages.push(Message {
                id: message_id.parse()?,
                queue: queue.clone(),
                body: codec::decode_str(raw.body.as_deref().unwrap_or_default()),
                attributes: raw.attributes,
                receipt: ReceiptHandle::new(receipt_handle, DriverKind::AwsSqs),
                delivery_count,
            });
        }

        if messages.is_empty() {
            return Ok(messages);
        }

        self.delete_received(queue, &queue_url, messages).await
    }

    /// Delete received messages, returning those whose deletion succeeded
    async fn delete_received(
        &self,
        queue: &QueueName,
        queue_url: &str,
        messages: Vec<Message>,
    ) -> Result<Vec<Message>, QueueError> {
        let mut params = vec![("QueueUrl".to_string(), queue_url.to_string())];
        for (index, message) in messages.iter().enumerate() {
            let n = index + 1;
            params.push((
                format!("DeleteMessageBatchRequestEntry.{}.Id", n),
                index.to_string(),
            ));
            params.push((
                format!("DeleteMessageBatchRequestEntry.{}.ReceiptHandle", n),
                message.receipt.handle().to_string(),
            ));
        }

        let failures = match self.make_request("DeleteMessageBatch", params).await {
            Ok(body) => parse_delete_batch_response(&body).map_err(|e| e.into_queue_error(queue))?,
            Err(e) => {
                return Err(QueueError::AcknowledgementFailed {
                    message_id: join_ids(&messages),
                    reason: e.to_string(),
                })
            }
        };

        if failures.is_empty() {
            return Ok(messages);
        }

        let failed: HashMap<usize, BatchFailure> = failures
            .into_iter()
            .filter_map(|f| f.id.parse().ok().map(|index| (index, f)))
            .collect();

        let mut acknowledged = Vec::with_capacity(messages.len());
        let mut first_failure = None;
        for (index, message) in messages.into_iter().enumerate() {
            match failed.get(&index) {
                Some(failure) => {
                    warn!(
                        queue = %queue,
                        message_id = %message.id,
                        code = %failure.code,
                        "Failed to delete received message; it will be redelivered"
                    );
                    first_failure.get_or_insert_with(|| QueueError::AcknowledgementFailed {
                        message_id: message.id.to_string(),
                        reason: format!("{}: {}", failure.code, failure.message),
                    });
                }
                None => acknowledged.push(message),
            }
        }

        match first_failure {
            Some(error) if acknowledged.is_empty() => Err(error),
            _ => Ok(acknowledged),
        }
    }
}

fn join_ids(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| m.id.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// SQS names: up to 80 ASCII alphanumerics, hyphens and underscores, with an
/// optional `.fifo` suffix
fn validate_queue_name(queue: &QueueName) -> Result<(), ValidationError> {
    let name = queue.as_str();
    if name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(ValidationError::OutOfRange {
            field: "queue_name".to_string(),
            message: format!("must be at most {} characters", MAX_QUEUE_NAME_LENGTH),
        });
    }

    let stem = name.strip_suffix(FIFO_SUFFIX).unwrap_or(name);
    if stem.is_empty()
        || !stem
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidFormat {
            field: "queue_name".to_string(),
            message: "only ASCII alphanumerics, hyphens, underscores and a '.fifo' suffix allowed"
                .to_string(),
        });
    }

    Ok(())
}

fn validate_receive_options(options: &ReceiveOptions) -> Result<(), ValidationError> {
    if let Some(wait) = options.wait_time {
        if wait > MAX_WAIT_TIME {
            return Err(ValidationError::OutOfRange {
                field: "wait_time".to_string(),
                message: format!("must be at most {} seconds", MAX_WAIT_TIME.as_secs()),
            });
        }
    }
    if let Some(timeout) = options.visibility_timeout {
        if timeout > MAX_VISIBILITY_TIMEOUT {
            return Err(ValidationError::OutOfRange {
                field: "visibility_timeout".to_string(),
                message: format!(
                    "must be at most {} seconds",
                    MAX_VISIBILITY_TIMEOUT.as_secs()
                ),
            });
        }
    }
    Ok(())
}

/// Flatten a map into `Prefix.N.Key` / `Prefix.N.Value` parameters
fn indexed_pairs(
    prefix: &str,
    key_name: &str,
    value_name: &str,
    entries: &BTreeMap<&String, &String>,
) -> Vec<(String, String)> {
    entries
        .iter()
        .enumerate()
        .flat_map(|(index, (key, value))| {
            let n = index + 1;
            [
                (format!("{}.{}.{}", prefix, n, key_name), key.to_string()),
                (format!("{}.{}.{}", prefix, n, value_name), value.to_string()),
            ]
        })
        .collect()
}

impl fmt::Debug for AwsSqsDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSqsDriver")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.signer.region)
            .field("credentials", &"<REDACTED>")
            .finish()
    }
}

#[async_trait]
impl QueueDriver for AwsSqsDriver {
    async fn create_queue(
        &self,
        queue: &QueueName,
        attributes: &HashMap<String, String>,
        tags: &HashMap<String, String>,
    ) -> Result<QueueRef, QueueError> {
        validate_queue_name(queue)?;

        let fifo_attribute = ("FifoQueue".to_string(), "true".to_string());
        let mut attributes: BTreeMap<&String, &String> = attributes.iter().collect();
        if queue.is_fifo() && !attributes.contains_key(&fifo_attribute.0) {
            attributes.insert(&fifo_attribute.0, &fifo_attribute.1);
        }
        let tags: BTreeMap<&String, &String> = tags.iter().collect();

        let mut params = vec![("QueueName".to_string(), queue.as_str().to_string())];
        params.extend(indexed_pairs("Attribute", "Name", "Value", &attributes));
        params.extend(indexed_pairs("Tag", "Key", "Value", &tags));

        let response = match self.make_request("CreateQueue", params).await {
            Ok(body) => body,
            Err(e) => return Err(self.fail(queue, e).await),
        };
        let queue_url = parse_element_text(&response, "QueueUrl")
            .map_err(|e| e.into_queue_error(queue))?
            .ok_or_else(|| SerializationError::MalformedResponse {
                message: "QueueUrl not found in CreateQueue response".to_string(),
            })?;

        self.queue_url_cache
            .write()
            .await
            .insert(queue.clone(), queue_url.clone());

        debug!(queue = %queue, url = %queue_url, "Queue created");
        Ok(QueueRef::new(queue.clone(), queue_url))
    }

    async fn does_queue_exist(&self, queue: &QueueName) -> Result<bool, QueueError> {
        validate_queue_name(queue)?;

        match self.get_queue_url(queue, true).await {
            Ok(_) => Ok(true),
            Err(AwsError::QueueNotFound) => {
                self.queue_url_cache.write().await.remove(queue);
                Ok(false)
            }
            Err(e) => Err(e.into_queue_error(queue)),
        }
    }

    async fn get_queue_by_name(
        &self,
        queue: &QueueName,
        skip_cache: bool,
    ) -> Result<QueueRef, QueueError> {
        validate_queue_name(queue)?;

        match self.get_queue_url(queue, skip_cache).await {
            Ok(url) => Ok(QueueRef::new(queue.clone(), url)),
            Err(e) => Err(self.fail(queue, e).await),
        }
    }

    async fn purge_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
        validate_queue_name(queue)?;

        let queue_url = match self.get_queue_url(queue, false).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(queue, e).await),
        };

        if let Err(e) = self
            .make_request("PurgeQueue", vec![("QueueUrl".to_string(), queue_url)])
            .await
        {
            return Err(self.fail(queue, e).await);
        }

        debug!(queue = %queue, "Queue purged");
        Ok(())
    }

    async fn send_message_to_queue(
        &self,
        queue: &QueueName,
        body: &Value,
        options: &SendOptions,
    ) -> Result<SendResult, QueueError> {
        validate_queue_name(queue)?;

        if let Some(delay) = options.delay {
            if delay > MAX_DELAY {
                return Err(ValidationError::OutOfRange {
                    field: "delay".to_string(),
                    message: format!("must be at most {} seconds", MAX_DELAY.as_secs()),
                }
                .into());
            }
        }

        let wire = codec::encode(body)?;
        let max_size = DriverKind::AwsSqs.max_message_size();
        if wire.len() > max_size {
            return Err(QueueError::MessageTooLarge {
                size: wire.len(),
                max_size,
            });
        }

        let queue_url = match self.get_queue_url(queue, false).await {
            Ok(url) => url,
            Err(e) => return Err(self.fail(queue, e).await),
        };

        let mut params = vec![
            ("QueueUrl".to_string(), queue_url),
            ("MessageBody".to_string(), wire),
        ];
        if let Some(delay) = options.delay {
            params.push(("DelaySeconds".to_string(), delay.as_secs().to_string()));
        }
        if let Some(group_id) = &options.group_id {
            params.push(("MessageGroupId".to_string(), group_id.clone()));
        }
        if let Some(dedup_id) = &options.deduplication_id {
            params.push(("MessageDeduplicationId".to_string(), dedup_id.clone()));
        }
        let attributes: BTreeMap<&String, &String> = options.attributes.iter().collect();
        for (index, (name, value)) in attributes.into_iter().enumerate() {
            let n = index + 1;
            params.push((format!("MessageAttribute.{}.Name", n), name.clone()));
            params.push((format!("MessageAttribute.{}.Value.StringValue", n), value.clone()));
            params.push((format!("MessageAttribute.{}.Value.DataType", n), "String".to_string()));
        }

        let response = match self.make_request("SendMessage", params).await {
            Ok(body) => body,
            Err(e) => return Err(self.fail(queue, e).await),
        };
        let message_id = parse_element_text(&response, "MessageId")
            .map_err(|e| e.into_queue_error(queue))?
            .ok_or_else(|| SerializationError::MalformedResponse {
                message: "MessageId not found in SendMessage response".to_string(),
            })?;

        debug!(queue = %queue, message_id = %message_id, "Message sent");
        Ok(SendResult {
            message_id: message_id.parse::<MessageId>()?,
            body: body.clone(),
        })
    }

    async fn receive_message_from_queue(
        &self,
        queue: &QueueName,
        options: &ReceiveOptions,
    ) -> Result<Option<Message>, QueueError> {
        validate_queue_name(queue)?;
        validate_receive_options(options)?;

        let messages = self
            .receive_batch(
                queue,
                1,
                options.wait_time.unwrap_or(Duration::ZERO),
                options.visibility_timeout,
            )
            .await?;

        Ok(messages.into_iter().next())
    }

    /// Receive with native batching
    ///
    /// The first `ReceiveMessage` call uses the requested wait time; follow-up
    /// calls to fill the batch do not wait. The loop ends when `max_count`
    /// messages are in hand or a call returns nothing.
    ///
    /// A failing follow-up call ends the batch. Its error is logged, not
    /// returned, because the messages already received have been deleted.
    async fn receive_messages_from_queue(
        &self,
        queue: &QueueName,
        max_count: usize,
        options: &ReceiveOptions,
    ) -> Result<Vec<Message>, QueueError> {
        let limit = max_count.min(self.max_batch_size());
        if limit == 0 {
            return Ok(Vec::new());
        }
        validate_queue_name(queue)?;
        validate_receive_options(options)?;

        let mut messages: Vec<Message> = Vec::with_capacity(limit);
        let mut wait_time = options.wait_time.unwrap_or(Duration::ZERO);

        while messages.len() < limit {
            let batch = match self
                .receive_batch(
                    queue,
                    limit - messages.len(),
                    wait_time,
                    options.visibility_timeout,
                )
                .await
            {
                Ok(batch) => batch,
                Err(e) if messages.is_empty() => return Err(e),
                Err(e) => {
                    warn!(
                        queue = %queue,
                        received = messages.len(),
                        error = %e,
                        "Receive failed part-way through batch; returning partial batch"
                    );
                    break;
                }
            };

            if batch.is_empty() {
                break;
            }
            messages.extend(batch);
            wait_time = Duration::ZERO;
        }

        debug!(queue = %queue, count = messages.len(), "Received message batch");
        Ok(messages)
    }

    fn driver_kind(&self) -> DriverKind {
        DriverKind::AwsSqs
    }
}
