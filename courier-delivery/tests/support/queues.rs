#![allow(dead_code)] // Not every test uses every queue

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use courier_queue::{DeliveryHandle, MemoryQueue, PendingMessage, QueueError, QueueSource};
use parking_lot::Mutex;

use super::pending;

/// Never runs dry. With `fixed` set, every fetch returns that many messages
/// whatever was asked for.
#[derive(Debug, Default)]
pub struct EndlessQueue {
    fixed: Option<usize>,
    refuse_release: bool,
    next: AtomicU64,
    requests: Mutex<Vec<usize>>,
    acknowledged: Mutex<Vec<DeliveryHandle>>,
    released: Mutex<Vec<DeliveryHandle>>,
}

impl EndlessQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn oversized(fixed: usize) -> Self {
        Self {
            fixed: Some(fixed),
            ..Self::default()
        }
    }

    /// Like [`Self::oversized`], but every release is refused
    pub fn oversized_refusing_release(fixed: usize) -> Self {
        Self {
            fixed: Some(fixed),
            refuse_release: true,
            ..Self::default()
        }
    }

    /// `max_count` of every fetch so far
    pub fn requests(&self) -> Vec<usize> {
        self.requests.lock().clone()
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged.lock().len()
    }

    pub fn released(&self) -> Vec<DeliveryHandle> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl QueueSource for EndlessQueue {
    async fn fetch_batch(&self, max_count: usize) -> courier_queue::Result<Vec<PendingMessage>> {
        self.requests.lock().push(max_count);

        let count = self.fixed.unwrap_or(max_count);
        Ok((0..count)
            .map(|_| {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                pending(&format!("reader{n}@example.com"), &format!("endless:{n}"))
            })
            .collect())
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> courier_queue::Result<()> {
        self.acknowledged.lock().push(handle.clone());
        Ok(())
    }

    async fn release(&self, handle: &DeliveryHandle) -> courier_queue::Result<()> {
        if self.refuse_release {
            return Err(QueueError::Unavailable("change visibility rejected".to_string()));
        }

        self.released.lock().push(handle.clone());
        Ok(())
    }
}

/// Hands out prepared batches, then nothing
#[derive(Debug, Default)]
pub struct ScriptedQueue {
    batches: Mutex<VecDeque<Vec<PendingMessage>>>,
    acknowledged: Mutex<Vec<DeliveryHandle>>,
}

impl ScriptedQueue {
    pub fn new(batches: impl IntoIterator<Item = Vec<PendingMessage>>) -> Self {
        Self {
            batches: Mutex::new(batches.into_iter().collect()),
            acknowledged: Mutex::default(),
        }
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged
            .lock()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

#[async_trait]
impl QueueSource for ScriptedQueue {
    async fn fetch_batch(&self, _max_count: usize) -> courier_queue::Result<Vec<PendingMessage>> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> courier_queue::Result<()> {
        self.acknowledged.lock().push(handle.clone());
        Ok(())
    }
}

/// A working queue whose acknowledgements always fail
#[derive(Debug, Default)]
pub struct FailingAckQueue {
    pub inner: MemoryQueue,
}

#[async_trait]
impl QueueSource for FailingAckQueue {
    async fn fetch_batch(&self, max_count: usize) -> courier_queue::Result<Vec<PendingMessage>> {
        self.inner.fetch_batch(max_count).await
    }

    async fn acknowledge(&self, _handle: &DeliveryHandle) -> courier_queue::Result<()> {
        Err(QueueError::Unavailable("delete rejected".to_string()))
    }

    async fn release(&self, handle: &DeliveryHandle) -> courier_queue::Result<()> {
        self.inner.release(handle).await
    }
}

/// Every fetch fails
#[derive(Debug, Default)]
pub struct UnavailableQueue;

#[async_trait]
impl QueueSource for UnavailableQueue {
    async fn fetch_batch(&self, _max_count: usize) -> courier_queue::Result<Vec<PendingMessage>> {
        Err(QueueError::Unavailable("connection refused".to_string()))
    }

    async fn acknowledge(&self, _handle: &DeliveryHandle) -> courier_queue::Result<()> {
        Ok(())
    }
}

/// Every fetch hangs forever
#[derive(Debug, Default)]
pub struct StalledQueue;

#[async_trait]
impl QueueSource for StalledQueue {
    async fn fetch_batch(&self, _max_count: usize) -> courier_queue::Result<Vec<PendingMessage>> {
        std::future::pending().await
    }

    async fn acknowledge(&self, _handle: &DeliveryHandle) -> courier_queue::Result<()> {
        Ok(())
    }
}
