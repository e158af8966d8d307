//! Error types for the courier-queue crate.

use std::io;

use thiserror::Error;

/// Every queue operation returns this error type.
///
/// The dispatcher treats any error from a fetch as the queue being
/// unavailable and ends the run; errors from acknowledge and release are
/// logged and the message is left for its lease to expire.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue collaborator could not be reached at all.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// I/O operation on the spool directory failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A message was refused at enqueue time.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A delivery handle was not minted by this queue.
    #[error("Invalid delivery handle: {0}")]
    InvalidHandle(String),

    /// The queue was configured with unusable settings.
    #[error("Invalid queue configuration: {0}")]
    Configuration(String),

    /// Internal error (capacity, collisions, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
