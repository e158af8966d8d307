use std::{sync::Arc, time::Duration};

use serde::Deserialize;

use crate::{
    DEFAULT_FETCH_LIMIT, DEFAULT_VISIBILITY_TIMEOUT_SECS, FileQueue, MemoryQueue, QueueError,
    QueueSource,
};

/// Which queue the dispatcher drains
///
/// # Examples
///
/// Spool directory in RON config:
/// ```ron
/// Courier (
///     queue: File((
///         path: "/var/spool/courier",
///         visibility_timeout_secs: 20,
///     )),
/// )
/// ```
///
/// In-memory queue with a capacity limit:
/// ```ron
/// Courier (
///     queue: Memory((
///         capacity: Some(1000),
///     )),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum QueueConfig {
    /// Spool directory of JSON messages
    File(FileQueue),
    /// In-process queue, empty at start
    Memory(MemoryConfig),
}

/// Configuration for the in-memory queue
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of messages to hold (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,

    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_fetch_limit")]
    pub fetch_limit: usize,
}

const fn default_visibility_timeout_secs() -> u64 {
    DEFAULT_VISIBILITY_TIMEOUT_SECS
}

const fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            visibility_timeout_secs: default_visibility_timeout_secs(),
            fetch_limit: default_fetch_limit(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::File(FileQueue::default())
    }
}

impl MemoryConfig {
    /// # Errors
    /// If the visibility timeout or the fetch limit is zero
    pub fn build(&self) -> crate::Result<MemoryQueue> {
        if self.visibility_timeout_secs == 0 {
            return Err(QueueError::Configuration(
                "visibility timeout must be greater than zero".to_string(),
            ));
        }

        if self.fetch_limit == 0 {
            return Err(QueueError::Configuration(
                "fetch limit must be greater than zero".to_string(),
            ));
        }

        Ok(self
            .capacity
            .map_or_else(MemoryQueue::new, MemoryQueue::with_capacity)
            .visibility_timeout(Duration::from_secs(self.visibility_timeout_secs))
            .fetch_limit(self.fetch_limit))
    }
}

impl QueueConfig {
    /// Build the configured queue as a trait object
    ///
    /// File queues are initialised first, so a bad spool directory fails here
    /// rather than on the first fetch.
    ///
    /// # Errors
    /// If the settings are unusable or the spool directory cannot be prepared
    pub fn into_queue_source(self) -> crate::Result<Arc<dyn QueueSource>> {
        match self {
            Self::File(queue) => {
                queue.init()?;
                Ok(Arc::new(queue))
            }
            Self::Memory(config) => Ok(Arc::new(config.build()?)),
        }
    }
}
