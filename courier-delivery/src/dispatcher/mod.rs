//! The queue-draining loop
//!
//! A run is a sequence of one-second cycles. Each cycle fetches and sends
//! until the window's budget is spent or its time is nearly up, then sleeps
//! out whatever is left of the second. The run ends after the cycle in which
//! the queue came back empty, or at the first cycle boundary past the
//! deadline.

mod config;
mod run;

use std::sync::Arc;

use courier_common::{internal, outbound};
use courier_queue::{PendingMessage, QueueError, QueueSource};
use tracing::{error, warn};

pub use self::{
    config::{DispatcherConfig, PermanentFailurePolicy, RateAccounting},
    run::{DispatcherState, RunReport, RunStatus},
};
use self::run::{DispatchCycle, DispatcherRun, Tally};
use crate::{
    DeliveryError, DeliveryReceipt, DispatchError, EmailSink, PermanentError, RateWindow,
    TemporaryError,
};

/// Drains a queue into an email provider without exceeding its send rate
#[derive(Debug)]
pub struct Dispatcher {
    queue: Arc<dyn QueueSource>,
    sink: Arc<dyn EmailSink>,
    window: RateWindow,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// # Errors
    /// [`DispatchError::Configuration`] if `config` fails validation
    pub fn new(
        queue: Arc<dyn QueueSource>,
        sink: Arc<dyn EmailSink>,
        config: DispatcherConfig,
    ) -> Result<Self, DispatchError> {
        config.validate()?;

        Ok(Self {
            queue,
            sink,
            window: RateWindow::new(config.per_second_send_cap, config.safety_margin_millis),
            config,
        })
    }

    #[must_use]
    pub const fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Drain the queue until it is empty or the run's deadline passes.
    ///
    /// Delivery failures never end the run; they are counted in the report.
    ///
    /// # Errors
    /// [`DispatchError::QueueUnavailable`] if a fetch fails or times out. The
    /// run stops at once and anything already sent stays sent.
    #[tracing::instrument(
        skip_all,
        fields(cap = self.config.per_second_send_cap, max_secs = self.config.max_run_duration_secs),
        err
    )]
    pub async fn run(&self) -> Result<RunReport, DispatchError> {
        let mut run = DispatcherRun::start(self.config.max_run_duration());
        internal!(level = DEBUG, "Dispatcher run started");

        while run.should_continue() {
            run.transition(DispatcherState::Running);
            self.cycle(&mut run).await?;
        }

        let report = run.finish();
        internal!(level = INFO, "Dispatcher run finished: {report}");

        Ok(report)
    }

    async fn cycle(&self, run: &mut DispatcherRun) -> Result<(), DispatchError> {
        let mut cycle = DispatchCycle::begin();
        run.tally.cycles += 1;
        run.transition(DispatcherState::DrainingCycle);

        while self
            .window
            .can_send_more(cycle.sent, RateWindow::elapsed_millis(cycle.started))
        {
            let budget = self.window.remaining_budget(cycle.sent) as usize;
            let mut batch = self.fetch(budget.min(self.config.provider_batch_limit)).await?;

            if batch.is_empty() {
                run.mark_drained();
                break;
            }

            if batch.len() > budget {
                let surplus = batch.split_off(budget);
                self.release(surplus, &mut run.tally).await;
            }

            for message in batch {
                cycle.attempted += 1;
                let delivered = self.deliver(&message, &mut run.tally).await;

                if delivered || self.config.rate_accounting == RateAccounting::Attempted {
                    cycle.sent += 1;
                }
            }
        }

        if cycle.attempted > 0 {
            run.tally.sending_cycles += 1;
        }

        internal!(
            level = DEBUG,
            "Cycle {} attempted {} ({} against budget) in {}ms",
            run.tally.cycles,
            cycle.attempted,
            cycle.sent,
            RateWindow::elapsed_millis(cycle.started)
        );

        if !run.is_drained() {
            run.transition(DispatcherState::ThrottleWait);
            RateWindow::sleep_remainder(cycle.started).await;
        }

        Ok(())
    }

    async fn fetch(&self, max_count: usize) -> Result<Vec<PendingMessage>, DispatchError> {
        let timeout = self.config.fetch_timeout();

        match tokio::time::timeout(timeout, self.queue.fetch_batch(max_count)).await {
            Ok(batch) => Ok(batch?),
            Err(_) => Err(QueueError::Unavailable(format!(
                "fetch timed out after {}ms",
                timeout.as_millis()
            ))
            .into()),
        }
    }

    /// Send one message and settle it with the queue.
    ///
    /// Returns whether the provider accepted it.
    async fn deliver(&self, message: &PendingMessage, tally: &mut Tally) -> bool {
        tally.attempted += 1;

        match self.send(message).await {
            Ok(receipt) => {
                tally.delivered += 1;
                outbound!(
                    level = DEBUG,
                    destination = %message.destination,
                    group = %message.group_key,
                    "Delivered ({})",
                    receipt.message_id
                );

                if let Err(e) = self.acknowledge(message).await {
                    tally.acknowledge_failures += 1;
                    warn!(
                        destination = %message.destination,
                        "Delivered but not acknowledged, it will be sent again once its lease expires: {e}"
                    );
                }

                true
            }
            Err(e) => {
                tally.failed += 1;
                self.handle_failure(message, &e, tally).await;
                false
            }
        }
    }

    async fn send(&self, message: &PendingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        if message.destination.trim().is_empty() {
            return Err(PermanentError::InvalidRecipient("empty destination".to_string()).into());
        }

        let timeout = self.config.send_timeout();
        tokio::time::timeout(timeout, self.sink.send(message))
            .await
            .map_err(|_| {
                TemporaryError::Timeout(format!("no reply within {}ms", timeout.as_millis()))
            })?
    }

    async fn handle_failure(&self, message: &PendingMessage, e: &DeliveryError, tally: &mut Tally) {
        match e {
            DeliveryError::Permanent(_)
                if self
                    .config
                    .permanent_failures
                    .should_drop(message.receive_count) =>
            {
                error!(
                    destination = %message.destination,
                    group = %message.group_key,
                    attempts = message.receive_count,
                    "Dropping undeliverable message: {e}"
                );

                match self.acknowledge(message).await {
                    Ok(()) => tally.dropped += 1,
                    Err(ack) => {
                        tally.acknowledge_failures += 1;
                        warn!(destination = %message.destination, "Failed to drop message: {ack}");
                    }
                }
            }
            DeliveryError::Permanent(_) => error!(
                destination = %message.destination,
                group = %message.group_key,
                attempts = message.receive_count,
                "Undeliverable message left queued: {e}"
            ),
            DeliveryError::Temporary(_) => warn!(
                destination = %message.destination,
                group = %message.group_key,
                "Delivery failed, will retry: {e}"
            ),
            DeliveryError::System(_) => error!(
                destination = %message.destination,
                group = %message.group_key,
                "Delivery failed, will retry: {e}"
            ),
        }
    }

    async fn acknowledge(&self, message: &PendingMessage) -> Result<(), QueueError> {
        let timeout = self.config.fetch_timeout();

        tokio::time::timeout(timeout, self.queue.acknowledge(&message.delivery_handle))
            .await
            .map_err(|_| {
                QueueError::Unavailable(format!("acknowledge timed out after {}ms", timeout.as_millis()))
            })?
    }

    /// Hand back messages fetched beyond the cycle's budget.
    ///
    /// A failed release only delays the message until its lease runs out.
    async fn release(&self, surplus: Vec<PendingMessage>, tally: &mut Tally) {
        internal!(level = DEBUG, "Releasing {} messages over budget", surplus.len());

        for message in surplus {
            let released = tokio::time::timeout(
                self.config.fetch_timeout(),
                self.queue.release(&message.delivery_handle),
            )
            .await;

            if matches!(released, Ok(Ok(()))) {
                tally.released += 1;
            } else {
                internal!(
                    level = DEBUG,
                    "Could not release {}, leaving it to its lease",
                    message.delivery_handle
                );
            }
        }
    }
}
