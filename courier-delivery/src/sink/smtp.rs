use std::time::Duration;

use async_trait::async_trait;
use courier_common::outbound;
use courier_queue::PendingMessage;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Mailbox,
        header::{ContentType, Header, HeaderName, HeaderValue},
    },
    transport::smtp::authentication::Credentials,
};
use serde::Deserialize;

use super::{DeliveryReceipt, EmailSink};
use crate::{DeliveryError, PermanentError, SystemError};

/// Read when the config carries a username but no password
pub const SMTP_PASSWORD_ENV: &str = "COURIER_SMTP_PASSWORD";

const fn default_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum SmtpSecurity {
    /// Plain connection upgraded with STARTTLS (usually port 587)
    #[default]
    StartTls,
    /// TLS from the first byte (usually port 465)
    Tls,
    /// No encryption at all; only for local relays and tests
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    /// Defaults to the port implied by `security`
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub security: SmtpSecurity,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Sender used for messages that don't name one
    pub from: String,
    /// Configuration set applied to messages that don't name one
    #[serde(default)]
    pub configuration_set: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmtpConfig {
    pub fn new(host: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            security: SmtpSecurity::default(),
            username: None,
            password: None,
            from: from.into(),
            configuration_set: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `X-SES-CONFIGURATION-SET`: routes the provider's delivery events
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConfigurationSet(String);

impl Header for ConfigurationSet {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-SES-CONFIGURATION-SET")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

/// Sends through the provider's SMTP relay
pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    default_from: Mailbox,
    configuration_set: Option<String>,
    host: String,
}

impl std::fmt::Debug for SmtpSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSink")
            .field("host", &self.host)
            .field("default_from", &self.default_from.to_string())
            .field("configuration_set", &self.configuration_set)
            .finish_non_exhaustive()
    }
}

impl SmtpSink {
    /// Build the transport. No connection is made until the first send.
    ///
    /// # Errors
    /// If the default sender is not a valid mailbox or the relay's TLS
    /// settings cannot be built
    pub fn new(config: &SmtpConfig) -> Result<Self, DeliveryError> {
        let default_from = config.from.parse::<Mailbox>().map_err(|e| {
            SystemError::Configuration(format!("invalid default sender {:?}: {e}", config.from))
        })?;

        let builder = match config.security {
            SmtpSecurity::StartTls => {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            }
            SmtpSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host),
            SmtpSecurity::None => Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                config.host.as_str(),
            )),
        }
        .map_err(|e| SystemError::Configuration(format!("SMTP relay {}: {e}", config.host)))?;

        let mut builder = builder.timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let Some(port) = config.port {
            builder = builder.port(port);
        }

        if let Some(username) = &config.username {
            let password = config
                .password
                .clone()
                .or_else(|| std::env::var(SMTP_PASSWORD_ENV).ok())
                .ok_or_else(|| {
                    SystemError::Configuration(format!(
                        "SMTP username given without a password (set it in the config or {SMTP_PASSWORD_ENV})"
                    ))
                })?;
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }

        Ok(Self {
            transport: builder.build(),
            default_from,
            configuration_set: config.configuration_set.clone(),
            host: config.host.clone(),
        })
    }

    /// Turn a queued message into an email
    ///
    /// # Errors
    /// Permanent errors for addresses or content the provider could never
    /// accept
    pub fn build_message(&self, message: &PendingMessage) -> Result<Message, DeliveryError> {
        let to = message
            .destination
            .trim()
            .parse::<Mailbox>()
            .map_err(|e| PermanentError::InvalidRecipient(format!("{}: {e}", message.destination)))?;

        let from = match &message.from {
            Some(from) => from
                .parse::<Mailbox>()
                .map_err(|e| PermanentError::InvalidSender(format!("{from}: {e}")))?,
            None => self.default_from.clone(),
        };

        let mut builder = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_HTML);

        if let Some(set) = message
            .configuration_set
            .as_ref()
            .or(self.configuration_set.as_ref())
        {
            builder = builder.header(ConfigurationSet(set.clone()));
        }

        builder
            .body(message.body.clone())
            .map_err(|e| PermanentError::MalformedMessage(e.to_string()).into())
    }
}

#[async_trait]
impl EmailSink for SmtpSink {
    async fn send(&self, message: &PendingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let email = self.build_message(message)?;

        outbound!(
            destination = %message.destination,
            group = %message.group_key,
            "Sending via {}",
            self.host
        );

        let response = self.transport.send(email).await?;
        let reply = response.first_line().unwrap_or_default().to_string();

        outbound!(
            level = DEBUG,
            destination = %message.destination,
            "Accepted: {} {reply}",
            response.code()
        );

        Ok(DeliveryReceipt::new(reply))
    }
}
