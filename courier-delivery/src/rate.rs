//! The one-second send window
//!
//! A cycle may keep sending while it has budget left and while finishing one
//! more batch still fits inside the second. Whatever is left of the second
//! after the cycle is slept off, so no window ever carries more than `cap`
//! sends.

use std::time::Duration;

use tokio::time::Instant;

/// Length of one rate window.
pub const WINDOW_MILLIS: u64 = 1000;

/// Whether a cycle that has sent `sent` messages and is `elapsed_millis` in
/// may start another fetch.
///
/// The comparison is strict, so a cycle that is exactly `1000 - margin` ms
/// in is already over.
#[must_use]
pub const fn can_send_more(
    sent: u32,
    cap: u32,
    elapsed_millis: u64,
    safety_margin_millis: u64,
) -> bool {
    sent < cap && elapsed_millis.saturating_add(safety_margin_millis) < WINDOW_MILLIS
}

/// Per-second budget shared by every cycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    cap: u32,
    safety_margin_millis: u64,
}

impl RateWindow {
    #[must_use]
    pub const fn new(cap: u32, safety_margin_millis: u64) -> Self {
        Self {
            cap,
            safety_margin_millis,
        }
    }

    #[must_use]
    pub const fn cap(&self) -> u32 {
        self.cap
    }

    #[must_use]
    pub const fn safety_margin_millis(&self) -> u64 {
        self.safety_margin_millis
    }

    /// Whole milliseconds since `cycle_start`
    #[must_use]
    pub fn elapsed_millis(cycle_start: Instant) -> u64 {
        u64::try_from(cycle_start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub const fn can_send_more(&self, sent: u32, elapsed_millis: u64) -> bool {
        can_send_more(sent, self.cap, elapsed_millis, self.safety_margin_millis)
    }

    /// Sends left in this cycle
    #[must_use]
    pub const fn remaining_budget(&self, sent: u32) -> u32 {
        self.cap.saturating_sub(sent)
    }

    /// Sleep until one full window has passed since `cycle_start`.
    ///
    /// Returns how long was slept; zero if the window was already over.
    pub async fn sleep_remainder(cycle_start: Instant) -> Duration {
        let window_end = cycle_start + Duration::from_millis(WINDOW_MILLIS);
        let remaining = window_end.saturating_duration_since(Instant::now());

        if !remaining.is_zero() {
            tokio::time::sleep_until(window_end).await;
        }

        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_is_exclusive() {
        assert!(can_send_more(0, 14, 899, 100));
        assert!(!can_send_more(0, 14, 900, 100));
        assert!(!can_send_more(0, 14, 1500, 100));
    }

    #[test]
    fn test_cap_is_exclusive() {
        assert!(can_send_more(13, 14, 0, 100));
        assert!(!can_send_more(14, 14, 0, 100));
        assert!(!can_send_more(0, 0, 0, 100));
    }

    #[test]
    fn test_zero_margin() {
        assert!(can_send_more(0, 1, 999, 0));
        assert!(!can_send_more(0, 1, 1000, 0));
    }

    #[test]
    fn test_remaining_budget_saturates() {
        let window = RateWindow::new(14, 100);
        assert_eq!(window.remaining_budget(0), 14);
        assert_eq!(window.remaining_budget(10), 4);
        assert_eq!(window.remaining_budget(20), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_remainder_fills_the_window() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(300)).await;
        assert_eq!(RateWindow::elapsed_millis(start), 300);

        let slept = RateWindow::sleep_remainder(start).await;
        assert_eq!(slept, Duration::from_millis(700));
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_remainder_after_overrun() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_millis(1200)).await;

        let slept = RateWindow::sleep_remainder(start).await;
        assert_eq!(slept, Duration::ZERO);
        assert_eq!(start.elapsed(), Duration::from_millis(1200));
    }
}
