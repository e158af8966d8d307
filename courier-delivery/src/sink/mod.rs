//! The email provider port and its implementations

mod log;
mod smtp;

use std::sync::Arc;

use async_trait::async_trait;
use courier_queue::PendingMessage;
use serde::Deserialize;

pub use self::{
    log::LogSink,
    smtp::{SmtpConfig, SmtpSecurity, SmtpSink},
};
use crate::DeliveryError;

/// Provider acknowledgement of one accepted message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Provider-assigned identifier, or its reply line when it assigns none
    pub message_id: String,
}

impl DeliveryReceipt {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
        }
    }
}

/// Submits one message to a transactional email provider.
///
/// A returned error never ends the cycle: the dispatcher logs it, leaves the
/// message queued (or drops it, for permanent failures past the configured
/// attempts) and moves on to the next message.
#[async_trait]
pub trait EmailSink: Send + Sync + std::fmt::Debug {
    /// # Errors
    /// If the provider did not accept the message
    async fn send(&self, message: &PendingMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Which provider messages are handed to
///
/// There is no default. A dry run acknowledges what it logs, so it has to be
/// asked for by name with `sink: Log`.
///
/// ```ron
/// sink: Smtp((
///     host: "email-smtp.eu-west-1.amazonaws.com",
///     from: "Newsletter <issues@example.org>",
///     username: Some("AKIA..."),
///     configuration_set: Some("Newsletter"),
/// )),
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum SinkConfig {
    Smtp(SmtpConfig),
    /// Log each message instead of sending it
    Log,
}

impl SinkConfig {
    /// # Errors
    /// If the SMTP transport cannot be configured
    pub fn into_sink(self) -> Result<Arc<dyn EmailSink>, DeliveryError> {
        match self {
            Self::Smtp(config) => Ok(Arc::new(SmtpSink::new(&config)?)),
            Self::Log => Ok(Arc::new(LogSink::default())),
        }
    }
}
