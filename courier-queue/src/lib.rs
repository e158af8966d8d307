//! Outbound mail queues for the courier dispatcher
//!
//! This crate provides:
//! - The [`QueueSource`] port the dispatcher drains
//! - [`PendingMessage`] and the producer's JSON wire format ([`OutboundEmail`])
//! - Visibility-timeout leases with per-group FIFO hand-out
//! - In-memory and spool-directory backends

pub mod backends;
pub mod config;
pub mod error;
mod lease;
pub mod message;
pub mod source;
pub mod types;

pub use backends::{FileQueue, FileQueueBuilder, MemoryQueue};
pub use config::{MemoryConfig, QueueConfig};
pub use error::{QueueError, Result};
pub use message::{OutboundEmail, PendingMessage};
pub use source::QueueSource;
pub use types::{DeliveryHandle, MessageId};

/// Most messages a single fetch hands out, matching the provider's cap.
pub const DEFAULT_FETCH_LIMIT: usize = 10;

/// Lease length for fetched messages, in seconds.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 20;
