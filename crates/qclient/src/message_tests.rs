//! Tests for message types and identifiers.

use super::*;
use serde_json::json;

#[test]
fn test_queue_name_validation() {
    // Valid names
    assert!(QueueName::new("test-queue").is_ok());
    assert!(QueueName::new("queue_123").is_ok());
    assert!(QueueName::new("a").is_ok());
    assert!(QueueName::new("orders.fifo").is_ok());
    assert!(QueueName::new("a".repeat(255)).is_ok());

    // Invalid names
    assert!(matches!(
        QueueName::new(""),
        Err(ValidationError::Required { .. })
    ));
    assert!(matches!(
        QueueName::new("a".repeat(256)),
        Err(ValidationError::OutOfRange { .. })
    ));
}

/// Verify that broker-style names pass; character rules belong to drivers.
#[test]
fn test_queue_name_accepts_broker_style_names() {
    for name in ["orders.created", "amq.gen-x", "tasks:high", "white space"] {
        let queue = QueueName::new(name).unwrap();
        assert_eq!(queue.as_str(), name);
    }
}

#[test]
fn test_queue_name_fifo_detection() {
    assert!(QueueName::new("orders.fifo").unwrap().is_fifo());
    assert!(!QueueName::new("orders").unwrap().is_fifo());
}

#[test]
fn test_message_id_generation() {
    let id1 = MessageId::new();
    let id2 = MessageId::new();
    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());

    assert!("".parse::<MessageId>().is_err());
    assert_eq!("abc".parse::<MessageId>().unwrap().as_str(), "abc");
}

#[test]
fn test_queue_ref_accessors() {
    let name = QueueName::new("test-queue").unwrap();
    let queue = QueueRef::new(name.clone(), "memory://test-queue");

    assert_eq!(queue.name(), &name);
    assert_eq!(queue.locator(), "memory://test-queue");
}

#[test]
fn test_message_body_as_typed_value() {
    #[derive(Debug, serde::Deserialize, PartialEq)]
    struct Order {
        id: u32,
        item: String,
    }

    let message = Message {
        id: MessageId::new(),
        queue: QueueName::new("orders").unwrap(),
        body: json!({ "id": 7, "item": "widget" }),
        attributes: HashMap::new(),
        receipt: ReceiptHandle::new("token", DriverKind::Memory),
        delivery_count: 1,
    };

    let order: Order = message.body_as().unwrap();
    assert_eq!(
        order,
        Order {
            id: 7,
            item: "widget".to_string()
        }
    );

    let wrong: Result<Vec<u8>, _> = message.body_as();
    assert!(wrong.is_err());
}

#[test]
fn test_send_options_report_set_fields() {
    assert!(SendOptions::new().set_options().is_empty());

    let options = SendOptions::new()
        .with_delay(Duration::from_secs(5))
        .with_attribute("trace", "abc");
    assert_eq!(options.set_options(), vec!["delay", "attributes"]);
}

#[test]
fn test_receive_options_report_set_fields() {
    assert!(ReceiveOptions::new().set_options().is_empty());

    let options = ReceiveOptions::new().with_visibility_timeout(Duration::ZERO);
    assert_eq!(options.set_options(), vec!["visibility_timeout"]);
}
