use async_trait::async_trait;

use crate::{DeliveryHandle, PendingMessage, Result};

/// Pull side of a durable, ordered outbound queue
///
/// Fetching leases each returned message: it stays invisible to every other
/// fetch until it is acknowledged, released, or its visibility timeout runs
/// out. That lease is the only concurrency control between dispatchers.
#[async_trait]
pub trait QueueSource: Send + Sync + std::fmt::Debug {
    /// Lease up to `max_count` visible messages, oldest first.
    ///
    /// An empty batch means nothing is visible right now. That is the
    /// dispatcher's signal that the queue has been drained, never an error.
    ///
    /// # Errors
    /// If the queue cannot be reached or read
    async fn fetch_batch(&self, max_count: usize) -> Result<Vec<PendingMessage>>;

    /// Remove a delivered message for good.
    ///
    /// Acknowledging a message that is already gone succeeds: the queue
    /// itself may hand a message out more than once.
    ///
    /// # Errors
    /// If the removal could not be carried out
    async fn acknowledge(&self, handle: &DeliveryHandle) -> Result<()>;

    /// End a lease early so the message is visible again without waiting for
    /// its visibility timeout.
    ///
    /// Queues that cannot do this leave the lease to expire.
    ///
    /// # Errors
    /// If the queue rejected the request
    async fn release(&self, _handle: &DeliveryHandle) -> Result<()> {
        Ok(())
    }
}
