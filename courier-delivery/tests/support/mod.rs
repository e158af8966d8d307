//! Test doubles for dispatcher tests
//!
//! Queues that misbehave in specific ways, and a sink that records every
//! attempt against the (paused) tokio clock.

#![allow(dead_code)]

pub mod queues;
pub mod sink;

pub use queues::{EndlessQueue, FailingAckQueue, ScriptedQueue, StalledQueue, UnavailableQueue};
pub use sink::{Failure, RecordingSink};

use courier_queue::{DeliveryHandle, PendingMessage};

/// A leased message as a queue would hand it out
pub fn pending(destination: &str, handle: &str) -> PendingMessage {
    PendingMessage {
        destination: destination.to_string(),
        subject: "Issue 1: Hello".to_string(),
        body: "<p>Hello</p>".to_string(),
        group_key: "1".to_string(),
        delivery_handle: DeliveryHandle::new(handle),
        from: None,
        configuration_set: None,
        receive_count: 1,
    }
}
