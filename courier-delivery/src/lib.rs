//! Rate-limited delivery of queued mail
//!
//! This crate provides:
//! - [`RateWindow`]: the one-second send budget and its compensating sleep
//! - [`EmailSink`]: the provider port, with SMTP and dry-run implementations
//! - [`Dispatcher`]: drains a [`courier_queue::QueueSource`] into an
//!   [`EmailSink`] one throttled cycle at a time until the queue is empty or
//!   the run's deadline passes

mod dispatcher;
mod error;
pub mod rate;
pub mod sink;

pub use dispatcher::{
    Dispatcher, DispatcherConfig, DispatcherState, PermanentFailurePolicy, RateAccounting,
    RunReport, RunStatus,
};
pub use error::{DeliveryError, DispatchError, PermanentError, SystemError, TemporaryError};
pub use rate::RateWindow;
pub use sink::{DeliveryReceipt, EmailSink, LogSink, SinkConfig, SmtpConfig, SmtpSecurity, SmtpSink};
