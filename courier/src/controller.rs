use std::sync::LazyLock;

use courier_common::{Signal, internal, tracing};
use courier_delivery::{Dispatcher, DispatcherConfig, RunReport, SinkConfig};
use courier_queue::QueueConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::trigger::{ServeSummary, Trigger, TriggerConfig};

/// Everything read from `courier.config.ron`
///
/// ```ron
/// Courier (
///     dispatcher: (
///         max_run_duration_secs: 840,
///         per_second_send_cap: 14,
///     ),
///     queue: File((path: "/var/spool/courier")),
///     sink: Log,
///     trigger: (interval_secs: 900),
/// )
/// ```
#[derive(Debug, Deserialize)]
pub struct Courier {
    dispatcher: DispatcherConfig,
    #[serde(default)]
    queue: QueueConfig,
    sink: SinkConfig,
    #[serde(default)]
    trigger: TriggerConfig,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Wait for SIGINT or SIGTERM, then ask the trigger to stop.
///
/// Returns once the trigger confirms, or straight away on a second CTRL+C.
#[tracing::instrument(level = "trace")]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!("CTRL+C entered -- the current run will finish first, enter it again to force shutdown");
        }
        _ = terminate.recv() => {
            internal!("Terminate Signal received, shutting down after the current run");
        }
    };

    let mut receiver = SHUTDOWN_BROADCAST.subscribe();

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    loop {
        tokio::select! {
            sig = receiver.recv() => {
                match sig {
                    Ok(Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(s) => tracing::debug!("Received {s:?}"),
                    Err(e) => tracing::debug!("Received: {e:?}"),
                }
            }

            _ = tokio::signal::ctrl_c() => {
                internal!(level = WARN, "Forcing shutdown");
                break;
            }
        }
    }

    Ok(())
}

impl Courier {
    /// Parse a RON config. `Some(..)` may be left off optional values.
    ///
    /// # Errors
    /// If the text is not valid RON or a required setting is missing
    pub fn from_ron(config: &str) -> anyhow::Result<Self> {
        Ok(ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(config)?)
    }

    #[must_use]
    pub const fn trigger(&self) -> &TriggerConfig {
        &self.trigger
    }

    /// Build the queue, sink and dispatcher this config describes
    ///
    /// # Errors
    /// If any of them fails to initialise or the dispatcher settings are
    /// invalid
    pub fn dispatcher(self) -> anyhow::Result<Dispatcher> {
        let queue = self.queue.into_queue_source()?;
        let sink = self.sink.into_sink()?;

        Ok(Dispatcher::new(queue, sink, self.dispatcher)?)
    }

    /// One scheduled invocation
    ///
    /// # Errors
    /// If the dispatcher could not be built or its run failed
    pub async fn run_once(self) -> anyhow::Result<RunReport> {
        let dispatcher = self.dispatcher()?;
        internal!("Controller running a single dispatch");

        Trigger::once(&dispatcher).await
    }

    /// Invoke a run every `trigger.interval_secs` until SIGINT or SIGTERM
    ///
    /// # Errors
    /// If the dispatcher could not be built or the signal handlers could not
    /// be installed
    pub async fn serve(self) -> anyhow::Result<ServeSummary> {
        let trigger = Trigger::new(self.trigger.interval());
        let dispatcher = self.dispatcher()?;

        internal!("Controller serving");

        let serve = async {
            let summary = trigger
                .serve(&dispatcher, SHUTDOWN_BROADCAST.subscribe())
                .await;
            let _ = SHUTDOWN_BROADCAST.send(Signal::Finalised);
            summary
        };

        let summary = tokio::select! {
            summary = serve => summary,
            r = shutdown() => {
                r?;
                ServeSummary::default()
            }
        };

        internal!("Shutting down...");

        Ok(summary)
    }
}
