#![allow(dead_code)] // Not every test uses every knob

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use courier_delivery::{
    DeliveryError, DeliveryReceipt, EmailSink, PermanentError, SystemError, TemporaryError,
};
use courier_queue::PendingMessage;
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Temporary,
    Permanent,
    System,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub destination: String,
    pub group: String,
    pub at: Instant,
}

/// Records every send attempt, failing the destinations it was told to
#[derive(Debug, Default)]
pub struct RecordingSink {
    attempts: Mutex<Vec<Attempt>>,
    failures: Mutex<HashMap<String, Failure>>,
    latency: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes `latency` before it answers
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn fail(&self, destination: &str, failure: Failure) {
        self.failures.lock().insert(destination.to_string(), failure);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn destinations(&self) -> Vec<String> {
        self.attempts
            .lock()
            .iter()
            .map(|attempt| attempt.destination.clone())
            .collect()
    }

    /// When `destination` was last attempted, relative to `start`
    pub fn attempted_at(&self, destination: &str, start: Instant) -> Option<Duration> {
        self.attempts
            .lock()
            .iter()
            .rev()
            .find(|attempt| attempt.destination == destination)
            .map(|attempt| attempt.at - start)
    }
}

#[async_trait]
impl EmailSink for RecordingSink {
    async fn send(&self, message: &PendingMessage) -> Result<DeliveryReceipt, DeliveryError> {
        self.attempts.lock().push(Attempt {
            destination: message.destination.clone(),
            group: message.group_key.clone(),
            at: Instant::now(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let failure = self.failures.lock().get(&message.destination).copied();
        match failure {
            None => Ok(DeliveryReceipt::new(format!("sent-{}", message.delivery_handle))),
            Some(Failure::Temporary) => {
                Err(TemporaryError::Throttled("Maximum sending rate exceeded".to_string()).into())
            }
            Some(Failure::Permanent) => Err(PermanentError::InvalidRecipient(
                "Address blacklisted".to_string(),
            )
            .into()),
            Some(Failure::System) => {
                Err(SystemError::Configuration("sender not verified".to_string()).into())
            }
        }
    }
}
