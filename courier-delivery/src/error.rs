//! Typed error handling for delivery operations.
//!
//! Per-message failures ([`DeliveryError`]) are split into:
//! - Permanent failures (bad address, rejected message) - retrying won't help
//! - Temporary failures (throttling, outages, timeouts) - retry on a later run
//! - System errors - the sink itself is broken or misconfigured
//!
//! Run-level failures ([`DispatchError`]) end the run and are reported to
//! whatever triggered it.

use courier_queue::QueueError;
use thiserror::Error;

/// Why a single message could not be delivered.
///
/// The dispatcher never lets one of these end a cycle or a run.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Permanent failure that should not be retried (e.g., 5xx SMTP codes).
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    /// Temporary failure that can be retried later (e.g., 4xx SMTP codes).
    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    /// The sink could not attempt delivery at all.
    #[error("System error: {0}")]
    System(#[from] SystemError),
}

/// Failures that will repeat on every attempt.
#[derive(Debug, Error)]
pub enum PermanentError {
    /// Destination address is malformed or was refused.
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    /// Sender identity is malformed or not verified with the provider.
    #[error("Invalid sender: {0}")]
    InvalidSender(String),

    /// The provider rejected the message itself.
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The message could not be turned into an email.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

/// Failures that may clear up by the next attempt.
#[derive(Debug, Error)]
pub enum TemporaryError {
    /// The provider's send-rate ceiling was hit.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// The provider reported an outage.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Could not connect to the provider.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider did not answer in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Server returned a temporary failure code.
    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),
}

/// Problems with the sink rather than the message.
#[derive(Debug, Error)]
pub enum SystemError {
    /// Invalid sink configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Other internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeliveryError {
    /// Returns `true` if this error is temporary and should be retried.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    /// Returns `true` if this error is permanent and should not be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    /// Returns `true` if this is a system error.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }
}

/// Convert an SMTP transport error into a `DeliveryError`.
///
/// - **Timeouts** → Temporary
/// - **5xx replies** → Permanent
/// - **4xx replies** → Temporary (`454` is the provider's throttling reply)
/// - **Client errors** → System (we built something invalid)
/// - **Connection/TLS errors** → Temporary
impl From<lettre::transport::smtp::Error> for DeliveryError {
    fn from(error: lettre::transport::smtp::Error) -> Self {
        let code = error.status().map(|code| code.to_string());
        let message = error.to_string();

        if error.is_timeout() {
            Self::Temporary(TemporaryError::Timeout(message))
        } else if error.is_permanent() {
            Self::Permanent(PermanentError::MessageRejected(message))
        } else if error.is_transient() {
            if code.as_deref() == Some("454") {
                Self::Temporary(TemporaryError::Throttled(message))
            } else {
                Self::Temporary(TemporaryError::SmtpTemporary(message))
            }
        } else if error.is_client() {
            Self::System(SystemError::Internal(message))
        } else {
            Self::Temporary(TemporaryError::ConnectionFailed(message))
        }
    }
}

/// Why a whole run ended early.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue could not be reached; the run is abandoned and the next
    /// trigger starts over.
    #[error("Queue unavailable: {0}")]
    QueueUnavailable(#[from] QueueError),

    /// A required setting is missing or unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),
}
