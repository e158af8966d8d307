use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use courier_common::outbound;
use courier_queue::PendingMessage;

use super::{DeliveryReceipt, EmailSink};
use crate::DeliveryError;

/// Dry-run sink: logs what would have been sent and accepts everything
#[derive(Debug, Default)]
pub struct LogSink {
    sent: AtomicU64,
}

impl LogSink {
    /// Messages accepted so far
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EmailSink for LogSink {
    async fn send(&self, message: &PendingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        self.sent.fetch_add(1, Ordering::Relaxed);

        outbound!(
            level = INFO,
            destination = %message.destination,
            group = %message.group_key,
            from = message.from.as_deref().unwrap_or("<default>"),
            "Would send {:?} ({} bytes)",
            message.subject,
            message.body.len()
        );

        Ok(DeliveryReceipt::new(format!("dry-run-{}", ulid::Ulid::new())))
    }
}
