use serde::{Deserialize, Serialize};

use crate::{DeliveryHandle, QueueError};

fn default_group() -> String {
    "default".to_string()
}

/// A queued email as the producer writes it
///
/// The keys follow the producer's JSON payload (`Destination`, `Subject`,
/// `Body`, `FromEmailAddress`, `ConfigurationSetName`), plus the queue-level
/// `MessageGroupId` used to keep one issue's sends in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutboundEmail {
    pub destination: String,
    pub subject: String,
    /// Rendered HTML
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration_set_name: Option<String>,
    #[serde(default = "default_group")]
    pub message_group_id: String,
}

impl OutboundEmail {
    pub fn new(
        destination: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            subject: subject.into(),
            body: body.into(),
            from_email_address: None,
            configuration_set_name: None,
            message_group_id: default_group(),
        }
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.message_group_id = group.into();
        self
    }

    #[must_use]
    pub fn with_sender(mut self, from: impl Into<String>) -> Self {
        self.from_email_address = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_configuration_set(mut self, name: impl Into<String>) -> Self {
        self.configuration_set_name = Some(name.into());
        self
    }

    /// Refuse messages that could never be delivered
    ///
    /// # Errors
    /// If the destination is blank or holds more than one address
    pub fn validate(&self) -> Result<(), QueueError> {
        let destination = self.destination.trim();
        if destination.is_empty() {
            return Err(QueueError::InvalidMessage(
                "destination must not be empty".to_string(),
            ));
        }

        if destination.contains(',') {
            return Err(QueueError::InvalidMessage(format!(
                "destination must be a single address: {destination}"
            )));
        }

        Ok(())
    }

    pub(crate) fn into_pending(self, delivery_handle: DeliveryHandle, receive_count: u32) -> PendingMessage {
        PendingMessage {
            destination: self.destination,
            subject: self.subject,
            body: self.body,
            group_key: self.message_group_id,
            delivery_handle,
            from: self.from_email_address,
            configuration_set: self.configuration_set_name,
            receive_count,
        }
    }
}

/// One unit of work handed to the dispatcher
///
/// Never mutated after it leaves the queue: it is either acknowledged
/// (removed for good), released, or left to reappear once its lease expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub destination: String,
    pub subject: String,
    pub body: String,
    /// Messages sharing a key are handed out in queue order
    pub group_key: String,
    pub delivery_handle: DeliveryHandle,
    /// Sender identity; the sink's default is used when absent
    pub from: Option<String>,
    /// Provider configuration profile
    pub configuration_set: Option<String>,
    /// Times the queue has leased this message, the current lease included
    pub receive_count: u32,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_producer_payload() {
        let payload = r#"{
            "ConfigurationSetName": "Newsletter",
            "Destination": "reader@example.com",
            "FromEmailAddress": "issues@example.org",
            "Subject": "Issue 42",
            "Body": "<p>Hello</p>",
            "MessageGroupId": "42"
        }"#;

        let email: OutboundEmail = serde_json::from_str(payload).unwrap();
        assert_eq!(email.destination, "reader@example.com");
        assert_eq!(email.from_email_address.as_deref(), Some("issues@example.org"));
        assert_eq!(email.configuration_set_name.as_deref(), Some("Newsletter"));
        assert_eq!(email.message_group_id, "42");
    }

    #[test]
    fn test_group_defaults_when_missing() {
        let payload = r#"{"Destination": "a@example.com", "Subject": "s", "Body": "b"}"#;
        let email: OutboundEmail = serde_json::from_str(payload).unwrap();
        assert_eq!(email.message_group_id, "default");
        assert!(email.from_email_address.is_none());
    }

    #[test]
    fn test_validate_destination() {
        assert!(OutboundEmail::new("a@example.com", "s", "b").validate().is_ok());
        assert!(OutboundEmail::new("   ", "s", "b").validate().is_err());
        assert!(
            OutboundEmail::new("a@example.com, b@example.com", "s", "b")
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_into_pending_carries_fields() {
        let email = OutboundEmail::new("a@example.com", "Subject", "<p>Body</p>")
            .with_group("7")
            .with_sender("from@example.org")
            .with_configuration_set("Newsletter");

        let pending = email.into_pending(DeliveryHandle::new("h"), 2);
        assert_eq!(pending.group_key, "7");
        assert_eq!(pending.from.as_deref(), Some("from@example.org"));
        assert_eq!(pending.configuration_set.as_deref(), Some("Newsletter"));
        assert_eq!(pending.receive_count, 2);
        assert_eq!(pending.delivery_handle.as_str(), "h");
    }
}
