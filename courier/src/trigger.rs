use std::time::Duration;

use courier_common::{Signal, internal};
use courier_delivery::{Dispatcher, RunReport, RunStatus};
use serde::Deserialize;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::MissedTickBehavior,
};

const fn default_interval_secs() -> u64 {
    60
}

/// How often `serve` starts a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TriggerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl TriggerConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Totals over every run a trigger started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub runs: u64,
    pub failed_runs: u64,
    pub drained_runs: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl ServeSummary {
    fn record(&mut self, report: &RunReport) {
        self.delivered += report.delivered;
        self.failed += report.failed;
        if report.status == RunStatus::QueueEmpty {
            self.drained_runs += 1;
        }
    }
}

/// Scheduled invocation of the dispatcher
///
/// At most one run is ever in flight: the next tick is only awaited once the
/// current run has returned, and ticks missed meanwhile are delayed rather
/// than fired back to back.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    interval: Duration,
}

impl Trigger {
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Invoke one run and hand back its report.
    ///
    /// # Errors
    /// If the run ended early, see [`Dispatcher::run`]
    pub async fn once(dispatcher: &Dispatcher) -> anyhow::Result<RunReport> {
        Ok(dispatcher.run().await?)
    }

    /// Run the dispatcher on every tick until [`Signal::Shutdown`] arrives.
    ///
    /// A shutdown is only noticed between runs, never in the middle of one.
    /// A failed run is logged and the next tick starts over.
    pub async fn serve(
        &self,
        dispatcher: &Dispatcher,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> ServeSummary {
        let mut summary = ServeSummary::default();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        internal!(
            level = INFO,
            "Triggering a dispatcher run every {}s",
            self.interval.as_secs()
        );

        loop {
            tokio::select! {
                biased;

                signal = shutdown.recv() => match signal {
                    Ok(Signal::Shutdown) | Err(RecvError::Closed) => break,
                    Ok(Signal::Finalised) | Err(RecvError::Lagged(_)) => continue,
                },
                _ = ticker.tick() => {}
            }

            summary.runs += 1;
            match dispatcher.run().await {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    summary.failed_runs += 1;
                    tracing::error!("Dispatcher run {} failed: {e}", summary.runs);
                }
            }
        }

        internal!(
            level = INFO,
            "Trigger stopped after {} runs ({} failed)",
            summary.runs,
            summary.failed_runs
        );

        summary
    }
}
