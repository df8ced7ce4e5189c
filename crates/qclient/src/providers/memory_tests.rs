//! Tests for in-memory queue driver.

use super::*;
use crate::client::QueueDriverExt;
use serde_json::json;

fn queue(name: &str) -> QueueName {
    QueueName::new(name).unwrap()
}

async fn driver_with_queue(name: &str) -> (InMemoryDriver, QueueName) {
    let driver = InMemoryDriver::new();
    let queue = queue(name);
    driver
        .create_queue(&queue, &HashMap::new(), &HashMap::new())
        .await
        .unwrap();
    (driver, queue)
}

// ============================================================================
// Queue Management Tests
// ============================================================================

mod queue_management {
    use super::*;

    /// Verify that creating the same queue twice refers to one logical queue.
    #[tokio::test]
    async fn test_create_queue_is_idempotent() {
        let (driver, queue) = driver_with_queue("orders").await;
        driver
            .send_message_to_queue(&queue, &json!("kept"), &SendOptions::default())
            .await
            .unwrap();

        let again = driver
            .create_queue(&queue, &HashMap::new(), &HashMap::new())
            .await
            .unwrap();

        assert_eq!(again.locator(), "memory://orders");
        assert_eq!(driver.queue_depth(&queue), Some(1));
    }

    #[tokio::test]
    async fn test_does_queue_exist_tracks_creation() {
        let driver = InMemoryDriver::new();
        let queue = queue("never-created");

        assert!(!driver.does_queue_exist(&queue).await.unwrap());

        driver
            .create_queue(&queue, &HashMap::new(), &HashMap::new())
            .await
            .unwrap();

        assert!(driver.does_queue_exist(&queue).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_queue_by_name() {
        let (driver, queue) = driver_with_queue("lookup").await;

        let found = driver.get_queue_by_name(&queue, false).await.unwrap();
        assert_eq!(found.name(), &queue);

        let fresh = driver.get_queue_by_name(&queue, true).await.unwrap();
        assert_eq!(fresh, found);

        let missing = driver.get_queue_by_name(&self::queue("missing"), false).await;
        assert!(matches!(missing, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify that attributes and tags are rejected rather than dropped.
    #[tokio::test]
    async fn test_create_queue_rejects_attributes_and_tags() {
        let driver = InMemoryDriver::new();
        let queue = queue("configured");

        let mut attributes = HashMap::new();
        attributes.insert("VisibilityTimeout".to_string(), "30".to_string());
        let result = driver
            .create_queue(&queue, &attributes, &HashMap::new())
            .await;
        assert!(matches!(
            result,
            Err(QueueError::UnsupportedOption { ref option, .. }) if option == "attributes"
        ));

        let mut tags = HashMap::new();
        tags.insert("team".to_string(), "payments".to_string());
        let result = driver.create_queue(&queue, &HashMap::new(), &tags).await;
        assert!(matches!(
            result,
            Err(QueueError::UnsupportedOption { ref option, .. }) if option == "tags"
        ));

        assert!(!driver.does_queue_exist(&queue).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_empty_and_populated_queue() {
        let (driver, queue) = driver_with_queue("purgeable").await;

        driver.purge_queue(&queue).await.unwrap();
        assert_eq!(driver.queue_depth(&queue), Some(0));

        for i in 0..4 {
            driver
                .send_message_to_queue(&queue, &json!(i), &SendOptions::default())
                .await
                .unwrap();
        }
        driver.purge_queue(&queue).await.unwrap();

        assert_eq!(driver.queue_depth(&queue), Some(0));
        let received = driver
            .receive_message_from_queue(&queue, &ReceiveOptions::default())
            .await
            .unwrap();
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn test_purge_missing_queue_fails() {
        let driver = InMemoryDriver::new();
        let result = driver.purge_queue(&queue("missing")).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));
    }
}

// ============================================================================
// Send and Receive Tests
// ============================================================================

mod send_receive {
    use super::*;

    #[tokio::test]
    async fn test_received_message_matches_send_result() {
        let (driver, queue) = driver_with_queue("roundtrip").await;
        let body = json!({ "order": 17, "items": ["a", "b"] });

        let sent = driver
            .send_message_to_queue(&queue, &body, &SendOptions::default())
            .await
            .unwrap();
        assert_eq!(sent.body, body);

        let received = driver
            .receive_message_from_queue(&queue, &ReceiveOptions::default())
            .await
            .unwrap()
            .expect("message should be available");

        assert_eq!(received.id, sent.message_id);
        assert_eq!(received.body, body);
        assert_eq!(received.queue, queue);
        assert_eq!(received.delivery_count, 1);
        assert_eq!(received.receipt.driver(), DriverKind::Memory);
        assert!(received.attributes.contains_key("enqueued_at"));
    }

    #[tokio::test]
    async fn test_messages_are_received_in_send_order() {
        let (driver, queue) = driver_with_queue("ordered").await;
        for i in 0..3 {
            driver
                .send_message_to_queue(&queue, &json!(i), &SendOptions::default())
                .await
                .unwrap();
        }

        for expected in 0..3 {
            let message = driver
                .receive_message_from_queue(&queue, &ReceiveOptions::default())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(message.body, json!(expected));
        }
    }

    #[tokio::test]
    async fn test_receive_from_empty_queue_returns_nothing() {
        let (driver, queue) = driver_with_queue("empty").await;

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

    #[tokio::test]
    async fn test_send_and_receive_on_missing_queue_fail() {
        let driver = InMemoryDriver::new();
        let missing = queue("missing");

        let send = driver
            .send_message_to_queue(&missing, &json!(1), &SendOptions::default())
            .await;
        assert!(matches!(send, Err(QueueError::QueueNotFound { .. })));

        let receive = driver
            .receive_message_from_queue(&missing, &ReceiveOptions::default())
            .await;
        assert!(matches!(receive, Err(QueueError::QueueNotFound { .. })));
    }

    /// Verify that a received message is gone for later receivers.
    #[tokio::test]
    async fn test_receive_acknowledges_message() {
        let (driver, queue) = driver_with_queue("acked").await;
        driver
            .send_message_to_queue(&queue, &json!("once"), &SendOptions::default())
            .await
            .unwrap();

        assert!(driver
            .receive_message_from_queue(&queue, &ReceiveOptions::default())
            .await
            .unwrap()
            .is_some());
        assert_eq!(driver.queue_depth(&queue), Some(0));
    }

    #[tokio::test]
    async fn test_wait_time_picks_up_late_message() {
        let (driver, queue) = driver_with_queue("late").await;
        let driver = Arc::new(driver);

        let sender = Arc::clone(&driver);
        let target = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender
                .send_message_to_queue(&target, &json!("late"), &SendOptions::default())
                .await
                .unwrap();
        });

        let options = ReceiveOptions::new().with_wait_time(Duration::from_secs(2));
        let message = driver
            .receive_message_from_queue(&queue, &options)
            .await
            .unwrap();

        assert_eq!(message.map(|m| m.body), Some(json!("late")));
    }

    #[tokio::test]
    async fn test_wait_time_expires_without_message() {
        let (driver, queue) = driver_with_queue("quiet").await;

        let options = ReceiveOptions::new().with_wait_time(Duration::from_millis(60));
        let started = Instant::now();
        let message = driver
            .receive_message_from_queue(&queue, &options)
            .await
            .unwrap();

        assert!(message.is_none());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_unsupported_options_are_rejected() {
        let (driver, queue) = driver_with_queue("strict").await;

        let send = driver
            .send_message_to_queue(
                &queue,
                &json!(1),
                &SendOptions::new().with_delay(Duration::from_secs(1)),
            )
            .await;
        assert!(matches!(
            send,
            Err(QueueError::UnsupportedOption { ref option, .. }) if option == "delay"
        ));

        let receive = driver
            .receive_message_from_queue(
                &queue,
                &ReceiveOptions::new().with_visibility_timeout(Duration::from_secs(30)),
            )
            .await;
        assert!(matches!(
            receive,
            Err(QueueError::UnsupportedOption { ref option, .. }) if option == "visibility_timeout"
        ));

        assert_eq!(driver.queue_depth(&queue), Some(0));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (driver, queue) = driver_with_queue("large").await;
        let body = json!("x".repeat(DriverKind::Memory.max_message_size()));

        let result = driver
            .send_message_to_queue(&queue, &body, &SendOptions::default())
            .await;

        assert!(matches!(result, Err(QueueError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_typed_helpers() {
        #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
        struct Job {
            id: u64,
            kind: String,
        }

        let (driver, queue) = driver_with_queue("typed").await;
        let job = Job {
            id: 9,
            kind: "resize".to_string(),
        };

        let sent = driver.send(&queue, &job).await.unwrap();
        let (received, message) = driver.receive_as::<Job>(&queue).await.unwrap().unwrap();

        assert_eq!(received, job);
        assert_eq!(message.id, sent.message_id);
    }
}

// ============================================================================
// Batch Receive Tests
// ============================================================================

mod batch_receive {
    use super::*;

    #[tokio::test]
    async fn test_batch_receive_is_capped_at_max_count() {
        let (driver, queue) = driver_with_queue("batched").await;
        for i in 0..15 {
            driver
                .send_message_to_queue(&queue, &json!(i), &SendOptions::default())
                .await
                .unwrap();
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
        assert_eq!(second.len(), 5);

        let bodies: Vec<Value> = first.iter().chain(&second).map(|m| m.body.clone()).collect();
        let expected: Vec<Value> = (0..15).map(|i| json!(i)).collect();
        assert_eq!(bodies, expected);
    }

    #[tokio::test]
    async fn test_batch_receive_clamps_to_driver_maximum() {
        let (driver, queue) = driver_with_queue("clamped").await;
        for i in 0..25 {
            driver
                .send_message_to_queue(&queue, &json!(i), &SendOptions::default())
                .await
                .unwrap();
        }

        let batch = driver
            .receive_messages_from_queue(&queue, 100, &ReceiveOptions::default())
            .await
            .unwrap();

        assert_eq!(batch.len(), driver.max_batch_size());
        assert_eq!(driver.queue_depth(&queue), Some(15));
    }

    #[tokio::test]
    async fn test_zero_max_count_receives_nothing() {
        let (driver, queue) = driver_with_queue("zero").await;
        driver
            .send_message_to_queue(&queue, &json!(1), &SendOptions::default())
            .await
            .unwrap();

        let batch = driver
            .receive_messages_from_queue(&queue, 0, &ReceiveOptions::default())
            .await
            .unwrap();

        assert!(batch.is_empty());
        assert_eq!(driver.queue_depth(&queue), Some(1));
    }

    #[tokio::test]
    async fn test_batch_receive_with_rejected_option_fails() {
        let (driver, queue) = driver_with_queue("rejected").await;
        driver
            .send_message_to_queue(&queue, &json!(1), &SendOptions::default())
            .await
            .unwrap();

        let options = ReceiveOptions::new().with_visibility_timeout(Duration::from_secs(5));
        let result = driver.receive_messages_from_queue(&queue, 5, &options).await;

        assert!(matches!(result, Err(QueueError::UnsupportedOption { .. })));
        assert_eq!(driver.queue_depth(&queue), Some(1));
    }
}
