//! Visibility-timeout bookkeeping for the in-memory queue

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use tokio::time::Instant;

use crate::{DeliveryHandle, MessageId};

#[derive(Debug, Clone)]
struct Lease {
    receipt: u32,
    group: String,
    expires_at: Instant,
}

/// Active leases and receive counts, keyed by message
#[derive(Debug, Default)]
pub(crate) struct LeaseTable {
    leases: HashMap<MessageId, Lease>,
    receives: HashMap<MessageId, u32>,
}

impl LeaseTable {
    pub(crate) fn is_leased(&self, id: &MessageId, now: Instant) -> bool {
        self.leases
            .get(id)
            .is_some_and(|lease| lease.expires_at > now)
    }

    /// Groups with a message currently out on lease.
    ///
    /// Nothing else from these groups may be handed out until that lease
    /// ends, otherwise a retry could overtake a later message of the same
    /// issue.
    pub(crate) fn blocked_groups(&self, now: Instant) -> HashSet<String> {
        self.leases
            .values()
            .filter(|lease| lease.expires_at > now)
            .map(|lease| lease.group.clone())
            .collect()
    }

    /// Lease `id` until `now + timeout`, returning the handle and the new
    /// receive count.
    pub(crate) fn lease(
        &mut self,
        id: &MessageId,
        group: &str,
        now: Instant,
        timeout: Duration,
    ) -> (DeliveryHandle, u32) {
        let receipt = self.receives.entry(id.clone()).or_insert(0);
        *receipt = receipt.saturating_add(1);
        let receipt = *receipt;

        self.leases.insert(
            id.clone(),
            Lease {
                receipt,
                group: group.to_string(),
                expires_at: now + timeout,
            },
        );

        (DeliveryHandle::for_lease(id, receipt), receipt)
    }

    /// Drop the lease on `id` if `receipt` still names the current one.
    ///
    /// Returns `true` when a lease was ended.
    pub(crate) fn release(&mut self, id: &MessageId, receipt: u32) -> bool {
        match self.leases.get(id) {
            Some(lease) if lease.receipt == receipt => {
                self.leases.remove(id);
                true
            }
            _ => false,
        }
    }

    /// Forget everything about an acknowledged message.
    pub(crate) fn forget(&mut self, id: &MessageId) {
        self.leases.remove(id);
        self.receives.remove(id);
    }

    pub(crate) fn receive_count(&self, id: &MessageId) -> u32 {
        self.receives.get(id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(20);

    #[test]
    fn test_lease_expires() {
        let mut table = LeaseTable::default();
        let id = MessageId::generate();
        let now = Instant::now();

        table.lease(&id, "1", now, TIMEOUT);
        assert!(table.is_leased(&id, now));
        assert!(table.is_leased(&id, now + Duration::from_secs(19)));
        assert!(!table.is_leased(&id, now + TIMEOUT));
    }

    #[test]
    fn test_receive_count_increments_per_lease() {
        let mut table = LeaseTable::default();
        let id = MessageId::generate();
        let now = Instant::now();

        let (first, count) = table.lease(&id, "1", now, TIMEOUT);
        assert_eq!(count, 1);
        let (second, count) = table.lease(&id, "1", now + TIMEOUT, TIMEOUT);
        assert_eq!(count, 2);
        assert_ne!(first, second);
        assert_eq!(table.receive_count(&id), 2);
    }

    #[test]
    fn test_stale_receipt_cannot_release() {
        let mut table = LeaseTable::default();
        let id = MessageId::generate();
        let now = Instant::now();

        table.lease(&id, "1", now, TIMEOUT);
        table.lease(&id, "1", now + TIMEOUT, TIMEOUT);

        assert!(!table.release(&id, 1));
        assert!(table.is_leased(&id, now + TIMEOUT));
        assert!(table.release(&id, 2));
        assert!(!table.is_leased(&id, now + TIMEOUT));
    }

    #[test]
    fn test_blocked_groups_only_count_live_leases() {
        let mut table = LeaseTable::default();
        let now = Instant::now();

        table.lease(&MessageId::generate(), "a", now, TIMEOUT);
        table.lease(&MessageId::generate(), "b", now, Duration::from_secs(1));

        let blocked = table.blocked_groups(now + Duration::from_secs(2));
        assert!(blocked.contains("a"));
        assert!(!blocked.contains("b"));
    }

    #[test]
    fn test_forget_clears_counts() {
        let mut table = LeaseTable::default();
        let id = MessageId::generate();

        table.lease(&id, "1", Instant::now(), TIMEOUT);
        table.forget(&id);
        assert_eq!(table.receive_count(&id), 0);
        assert!(!table.is_leased(&id, Instant::now()));
    }
}
