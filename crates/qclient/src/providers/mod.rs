//! Queue driver implementations.
//!
//! This module contains concrete implementations of the `QueueDriver` trait
//! for each supported backend.

pub mod amqp;
pub mod aws;
pub mod memory;

pub use amqp::AmqpDriver;
pub use aws::AwsSqsDriver;
pub use memory::InMemoryDriver;
