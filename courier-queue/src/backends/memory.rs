use std::{collections::BTreeMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    DEFAULT_FETCH_LIMIT, DEFAULT_VISIBILITY_TIMEOUT_SECS, DeliveryHandle, MessageId,
    OutboundEmail, PendingMessage, QueueError, QueueSource, lease::LeaseTable,
};

#[derive(Debug, Default)]
struct Inner {
    messages: BTreeMap<MessageId, OutboundEmail>,
    leases: LeaseTable,
}

/// In-memory queue
///
/// Behaves like a FIFO queue with visibility timeouts: every fetch leases
/// what it returns, a group with a message out on lease hands out nothing
/// else until that lease ends, and each lease bumps the message's receive
/// count. Clones share the same queue.
///
/// Leases are measured on the tokio clock, so tests running with a paused
/// runtime can step past a visibility timeout with `tokio::time::advance`.
#[derive(Debug, Clone)]
pub struct MemoryQueue {
    inner: Arc<Mutex<Inner>>,
    visibility_timeout: Duration,
    fetch_limit: usize,
    capacity: Option<usize>,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    /// Create an empty queue with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
            capacity: None,
        }
    }

    /// Create an empty queue that refuses to hold more than `capacity` messages
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    #[must_use]
    pub const fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Cap on how many messages one fetch may return, whatever is asked for
    #[must_use]
    pub const fn fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// Add a message to the back of the queue
    ///
    /// # Errors
    /// If the message is invalid or the queue is full
    pub fn enqueue(&self, email: OutboundEmail) -> crate::Result<MessageId> {
        email.validate()?;

        let mut inner = self.inner.lock();
        if let Some(cap) = self.capacity
            && inner.messages.len() >= cap
        {
            return Err(QueueError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} messages",
                inner.messages.len()
            )));
        }

        let id = MessageId::generate();
        inner.messages.insert(id.clone(), email);
        drop(inner);

        Ok(id)
    }

    /// Messages held, leased or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages not currently out on lease
    #[must_use]
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .messages
            .keys()
            .filter(|id| !inner.leases.is_leased(id, now))
            .count()
    }

    /// Times `id` has been leased, zero once it has been acknowledged
    #[must_use]
    pub fn receive_count(&self, id: &MessageId) -> u32 {
        self.inner.lock().leases.receive_count(id)
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.inner.lock().messages.contains_key(id)
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

fn parse_handle(handle: &DeliveryHandle) -> crate::Result<(MessageId, u32)> {
    handle
        .lease_parts()
        .ok_or_else(|| QueueError::InvalidHandle(handle.to_string()))
}

#[async_trait]
impl QueueSource for MemoryQueue {
    async fn fetch_batch(&self, max_count: usize) -> crate::Result<Vec<PendingMessage>> {
        let max_count = max_count.min(self.fetch_limit);
        let now = Instant::now();

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let blocked = inner.leases.blocked_groups(now);

        let chosen: Vec<MessageId> = inner
            .messages
            .iter()
            .filter(|(id, email)| {
                !inner.leases.is_leased(id, now) && !blocked.contains(&email.message_group_id)
            })
            .map(|(id, _)| id.clone())
            .take(max_count)
            .collect();

        let mut batch = Vec::with_capacity(chosen.len());
        for id in chosen {
            let Some(email) = inner.messages.get(&id) else {
                continue;
            };
            let (handle, receive_count) =
                inner
                    .leases
                    .lease(&id, &email.message_group_id, now, self.visibility_timeout);
            batch.push(email.clone().into_pending(handle, receive_count));
        }
        drop(guard);

        Ok(batch)
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> crate::Result<()> {
        let (id, _) = parse_handle(handle)?;

        let mut inner = self.inner.lock();
        inner.messages.remove(&id);
        inner.leases.forget(&id);

        Ok(())
    }

    async fn release(&self, handle: &DeliveryHandle) -> crate::Result<()> {
        let (id, receipt) = parse_handle(handle)?;
        self.inner.lock().leases.release(&id, receipt);
        Ok(())
    }
}
