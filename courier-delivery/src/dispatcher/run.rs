use std::{fmt, time::Duration};

use courier_common::internal;
use tokio::time::Instant;

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    /// Between cycles, checking the deadline
    Running,
    /// Fetching and sending inside a one-second window
    DrainingCycle,
    /// Sleeping out the rest of the window
    ThrottleWait,
    /// A fetch came back empty
    QueueEmpty,
    /// The run's time budget is spent
    DeadlineReached,
}

impl DispatcherState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::QueueEmpty | Self::DeadlineReached)
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    QueueEmpty,
    DeadlineReached,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::QueueEmpty => "QUEUE_EMPTY",
            Self::DeadlineReached => "DEADLINE_REACHED",
        })
    }
}

impl From<RunStatus> for DispatcherState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::QueueEmpty => Self::QueueEmpty,
            RunStatus::DeadlineReached => Self::DeadlineReached,
        }
    }
}

/// Message counts accumulated over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Tally {
    pub cycles: u32,
    pub sending_cycles: u32,
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
    pub released: u64,
    pub acknowledge_failures: u64,
}

/// Summary of one finished run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// Cycles started, including a final one that only found the queue empty
    pub cycles: u32,
    /// Cycles that attempted at least one send
    pub sending_cycles: u32,
    pub attempted: u64,
    pub delivered: u64,
    /// Sends the provider refused or that timed out
    pub failed: u64,
    /// Permanent failures acknowledged and discarded
    pub dropped: u64,
    /// Fetched past the cycle's budget and handed back unsent
    pub released: u64,
    pub acknowledge_failures: u64,
    pub elapsed: Duration,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} cycles in {:.1}s: {} attempted, {} delivered, {} failed, {} dropped, {} released",
            self.status,
            self.cycles,
            self.elapsed.as_secs_f64(),
            self.attempted,
            self.delivered,
            self.failed,
            self.dropped,
            self.released
        )?;

        if self.acknowledge_failures > 0 {
            write!(f, ", {} acknowledge failures", self.acknowledge_failures)?;
        }

        Ok(())
    }
}

/// Bookkeeping for one bounded run
#[derive(Debug)]
pub(crate) struct DispatcherRun {
    started: Instant,
    deadline: Instant,
    queue_drained: bool,
    state: DispatcherState,
    pub tally: Tally,
}

impl DispatcherRun {
    pub fn start(max_duration: Duration) -> Self {
        let started = Instant::now();
        // A budget too large to represent never ends the run
        let deadline = started
            .checked_add(max_duration)
            .unwrap_or_else(|| started + Duration::from_secs(60 * 60 * 24 * 365));

        Self {
            started,
            deadline,
            queue_drained: false,
            state: DispatcherState::Running,
            tally: Tally::default(),
        }
    }

    /// Whether another cycle may start
    pub fn should_continue(&self) -> bool {
        !self.queue_drained && Instant::now() < self.deadline
    }

    pub const fn mark_drained(&mut self) {
        self.queue_drained = true;
    }

    pub const fn is_drained(&self) -> bool {
        self.queue_drained
    }

    pub fn transition(&mut self, next: DispatcherState) {
        if self.state != next {
            internal!("Dispatcher {:?} -> {next:?}", self.state);
            self.state = next;
        }
    }

    pub fn finish(mut self) -> RunReport {
        let status = if self.queue_drained {
            RunStatus::QueueEmpty
        } else {
            RunStatus::DeadlineReached
        };
        self.transition(status.into());

        let Tally {
            cycles,
            sending_cycles,
            attempted,
            delivered,
            failed,
            dropped,
            released,
            acknowledge_failures,
        } = self.tally;

        RunReport {
            status,
            cycles,
            sending_cycles,
            attempted,
            delivered,
            failed,
            dropped,
            released,
            acknowledge_failures,
            elapsed: self.started.elapsed(),
        }
    }
}

/// One pass through the one-second window
#[derive(Debug)]
pub(crate) struct DispatchCycle {
    pub started: Instant,
    /// Sends that consumed budget
    pub sent: u32,
    pub attempted: u32,
}

impl DispatchCycle {
    pub fn begin() -> Self {
        Self {
            started: Instant::now(),
            sent: 0,
            attempted: 0,
        }
    }
}
