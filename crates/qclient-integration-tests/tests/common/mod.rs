//! Common test utilities for qclient integration tests
//!
//! This module provides:
//! - Configuration for the live backends, read from the environment
//! - Unique queue names so runs do not interfere
//! - The driver contract checks shared by every backend suite

#![allow(dead_code)]

use qclient::{
    ClientConfig, DriverKind, QueueDriver, QueueDriverExt, QueueError, QueueName, ReceiveOptions,
};
use serde_json::json;
use std::collections::HashMap;

// ============================================================================
// Backend Configuration
// ============================================================================

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// SQS-compatible endpoint, LocalStack by default
pub fn sqs_config() -> ClientConfig {
    ClientConfig::new(DriverKind::AwsSqs)
        .with_host(env_or("QCLIENT_TEST_SQS_ENDPOINT", "http://localhost:4566"))
        .with_region(env_or("QCLIENT_TEST_SQS_REGION", "us-east-1"))
        .with_credential("key_id", env_or("QCLIENT_TEST_SQS_KEY_ID", "test"))
        .with_credential("secret", env_or("QCLIENT_TEST_SQS_SECRET", "test"))
}

/// RabbitMQ broker, a local container by default
pub fn amqp_config() -> ClientConfig {
    let port = env_or("QCLIENT_TEST_AMQP_PORT", "5672")
        .parse()
        .unwrap_or(5672);

    ClientConfig::new(DriverKind::Amqp)
        .with_host(env_or("QCLIENT_TEST_AMQP_HOST", "localhost"))
        .with_port(port)
        .with_credential("username", env_or("QCLIENT_TEST_AMQP_USERNAME", "guest"))
        .with_credential("password", env_or("QCLIENT_TEST_AMQP_PASSWORD", "guest"))
}

/// Queue name unique to this test run
pub fn unique_queue(prefix: &str) -> QueueName {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    QueueName::new(format!("{}-{}", prefix, &suffix[..12])).unwrap()
}

/// Create a queue with no attributes or tags
pub async fn create(driver: &dyn QueueDriver, queue: &QueueName) {
    driver
        .create_queue(queue, &HashMap::new(), &HashMap::new())
        .await
        .unwrap();
}

// ============================================================================
// Driver Contract
// ============================================================================

/// Creating the same queue twice succeeds and names the same queue.
pub async fn check_create_is_idempotent(driver: &dyn QueueDriver) {
    let queue = unique_queue("idempotent");

    let first = driver
        .create_queue(&queue, &HashMap::new(), &HashMap::new())
        .await
        .unwrap();
    let second = driver
        .create_queue(&queue, &HashMap::new(), &HashMap::new())
        .await
        .unwrap();

    assert_eq!(first.name(), second.name());
    assert_eq!(first.locator(), second.locator());
}

/// Existence is false before creation and true after.
///
/// Drivers without a native existence check create the queue while checking,
/// so only the second half holds for them.
pub async fn check_existence(driver: &dyn QueueDriver) {
    let queue = unique_queue("exists");

    if driver.driver_kind().has_native_existence_check() {
        assert!(!driver.does_queue_exist(&queue).await.unwrap());
    }

    create(driver, &queue).await;
    assert!(driver.does_queue_exist(&queue).await.unwrap());
}

/// A received message carries the identifier returned by the send.
pub async fn check_send_receive_round_trip(driver: &dyn QueueDriver) {
    let queue = unique_queue("round-trip");
    create(driver, &queue).await;

    let body = json!({ "order_id": 42, "items": ["book", "pen"] });
    let sent = driver.send(&queue, &body).await.unwrap();
    assert_eq!(sent.body, body);

    let received = driver
        .receive_message_from_queue(&queue, &ReceiveOptions::default())
        .await
        .unwrap()
        .expect("message should be available");

    assert_eq!(received.id, sent.message_id);
    assert_eq!(received.body, body);
    assert_eq!(received.queue, queue);
}

/// Empty queues yield nothing from both receive operations.
pub async fn check_empty_receive(driver: &dyn QueueDriver) {
    let queue = unique_queue("empty");
    create(driver, &queue).await;

    let single = driver
        .receive_message_from_queue(&queue, &ReceiveOptions::default())
        .await
        .unwrap();
    assert!(single.is_none());

    let batch = driver
        .receive_messages_from_queue(&queue, 10, &ReceiveOptions::default())
        .await
        .unwrap();
    assert!(batch.is_empty());
}

/// Batch receives never exceed the requested count.
pub async fn check_batch_receive_is_bounded(driver: &dyn QueueDriver) {
    let queue = unique_queue("batch");
    create(driver, &queue).await;

    for i in 0..15 {
        driver.send(&queue, &json!({ "seq": i })).await.unwrap();
    }

    let first = driver
        .receive_messages_from_queue(&queue, 10, &ReceiveOptions::default())
        .await
        .unwrap();
    assert_eq!(first.len(), 10);

    let second = driver
        .receive_messages_from_queue(&queue, 10, &ReceiveOptions::default())
        .await
        .unwrap();
    assert!(second.len() <= 5);
}

/// Purging empties a queue, and purging an empty queue succeeds.
pub async fn check_purge(driver: &dyn QueueDriver) {
    let queue = unique_queue("purge");
    create(driver, &queue).await;

    driver.purge_queue(&queue).await.unwrap();

    for i in 0..3 {
        driver.send(&queue, &json!({ "seq": i })).await.unwrap();
    }
    driver.purge_queue(&queue).await.unwrap();

    let remaining = driver
        .receive_message_from_queue(&queue, &ReceiveOptions::default())
        .await
        .unwrap();
    assert!(remaining.is_none());
}

/// Lookup by name either resolves an existing queue or is reported as
/// unsupported for every input.
pub async fn check_get_queue_by_name(driver: &dyn QueueDriver) {
    let queue = unique_queue("lookup");
    create(driver, &queue).await;

    match driver.get_queue_by_name(&queue, false).await {
        Ok(queue_ref) => assert_eq!(queue_ref.name(), &queue),
        Err(QueueError::NotSupported { driver: kind, .. }) => {
            assert_eq!(kind, driver.driver_kind());
            let missing = unique_queue("lookup-missing");
            assert!(matches!(
                driver.get_queue_by_name(&missing, true).await,
                Err(QueueError::NotSupported { .. })
            ));
        }
        Err(e) => panic!("Unexpected lookup error: {:?}", e),
    }
}

/// Attributes on a driver that cannot apply them fail loudly.
pub async fn check_unsupported_attributes_rejected(driver: &dyn QueueDriver) {
    let queue = unique_queue("attrs");
    let attributes = HashMap::from([("VisibilityTimeout".to_string(), "60".to_string())]);

    let result = driver
        .create_queue(&queue, &attributes, &HashMap::new())
        .await;

    assert!(matches!(
        result,
        Err(QueueError::UnsupportedOption { ref option, .. }) if option == "attributes"
    ));
}
