//! Tests for body encoding.

use super::*;
use serde_json::json;

#[test]
fn test_structured_body_survives_round_trip() {
    let body = json!({
        "order": 42,
        "lines": [{ "sku": "A-1", "qty": 2 }, { "sku": "B-7", "qty": 1 }],
        "note": null,
        "priority": 1.5
    });

    let wire = encode(&body).unwrap();
    assert_eq!(decode(wire.as_bytes()).unwrap(), body);
    assert_eq!(decode_str(&wire), body);
}

#[test]
fn test_string_body_is_quoted_on_the_wire() {
    let wire = encode(&json!("message")).unwrap();
    assert_eq!(wire, "\"message\"");
    assert_eq!(decode_str(&wire), json!("message"));
}

#[test]
fn test_plain_text_from_foreign_producer_decodes_to_string() {
    assert_eq!(decode_str("hello world"), json!("hello world"));
    assert_eq!(decode(b"hello world").unwrap(), json!("hello world"));
}

#[test]
fn test_invalid_utf8_is_rejected() {
    let result = decode(&[0xff, 0xfe, 0x00]);
    assert!(matches!(result, Err(SerializationError::InvalidUtf8)));
}
