use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use courier_common::internal;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    DEFAULT_FETCH_LIMIT, DEFAULT_VISIBILITY_TIMEOUT_SECS, DeliveryHandle, MessageId,
    OutboundEmail, PendingMessage, QueueError, QueueSource,
};

const TEMP_PREFIX: &str = ".tmp_";
const REJECTED_SUFFIX: &str = ".rejected";
const LEASE_EXTENSION: &str = "lease";

/// Lease state kept beside a message as `{ulid}.lease`
///
/// `receipt` counts every lease the message has had, so it survives the
/// lease itself: releasing rewrites the expiry, only an acknowledgement
/// removes the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LeaseRecord {
    receipt: u32,
    group: String,
    /// Wall-clock milliseconds since the Unix epoch
    expires_at_ms: u64,
}

impl LeaseRecord {
    const fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX))
}

/// `remove_file` that treats an already missing file as removed
async fn remove_if_present(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Spool-directory queue
///
/// Each message is one `{ulid}.json` file holding an [`OutboundEmail`] in
/// the producer's JSON format. Files are handed out in ULID (creation) order.
///
/// # Leases
/// Fetching writes a `{ulid}.lease` file next to the message holding its
/// receive count, its group and a wall-clock expiry. Every `FileQueue` on the
/// directory reads those files, so a lease taken by one `courier run` hides
/// the message from the next one, and receive counts keep growing across
/// processes until the message is acknowledged. Two dispatchers fetching at
/// the very same moment can still both lease a message, so scheduled runs
/// should not overlap.
///
/// # Atomicity
/// [`FileQueue::enqueue`] writes `.tmp_{ulid}.json` and renames it into
/// place, so a fetch never sees a half-written message. Temporary files left
/// by a crash are removed by [`FileQueue::init`].
///
/// # Malformed files
/// A file that does not decode is renamed to `{name}.rejected` and skipped,
/// so one bad producer write cannot stall the queue.
#[derive(Debug, Clone)]
pub struct FileQueue {
    path: PathBuf,
    visibility_timeout: Duration,
    fetch_limit: usize,
}

impl Default for FileQueue {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/courier"),
            visibility_timeout: Duration::from_secs(DEFAULT_VISIBILITY_TIMEOUT_SECS),
            fetch_limit: DEFAULT_FETCH_LIMIT,
        }
    }
}

const fn default_visibility_timeout_secs() -> u64 {
    DEFAULT_VISIBILITY_TIMEOUT_SECS
}

const fn default_fetch_limit() -> usize {
    DEFAULT_FETCH_LIMIT
}

impl<'de> Deserialize<'de> for FileQueue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileQueueHelper {
            path: PathBuf,
            #[serde(default = "default_visibility_timeout_secs")]
            visibility_timeout_secs: u64,
            #[serde(default = "default_fetch_limit")]
            fetch_limit: usize,
        }

        let helper = FileQueueHelper::deserialize(deserializer)?;

        Self::builder()
            .path(helper.path)
            .visibility_timeout(Duration::from_secs(helper.visibility_timeout_secs))
            .fetch_limit(helper.fetch_limit)
            .build()
            .map_err(serde::de::Error::custom)
    }
}

impl FileQueue {
    /// Validate a spool path
    ///
    /// Rejects relative paths, `..` components and system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> crate::Result<()> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(QueueError::Configuration(format!(
                "Queue path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(QueueError::Configuration(format!(
                "Queue path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(QueueError::Configuration(format!(
                "Queue path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileQueueBuilder {
        FileQueueBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare the spool directory
    ///
    /// Creates it when missing and checks that it is a directory. Temporary
    /// files left behind by interrupted writes are removed, as are lease
    /// files whose message is gone.
    ///
    /// # Errors
    /// - If the directory cannot be created or read
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising queue at {} ...", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(QueueError::Configuration(format!(
                "Expected {} to be a Directory, but it is not",
                self.path.display()
            )));
        }

        let mut cleaned = 0;
        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let path = entry.path();
            let interrupted = entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX);
            let orphaned = path.extension().is_some_and(|ext| ext == LEASE_EXTENSION)
                && !path.with_extension("json").try_exists()?;

            if interrupted || orphaned {
                std::fs::remove_file(&path)?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} stale files from {}",
                self.path.display()
            );
        }

        Ok(())
    }

    /// Write a message into the spool directory
    ///
    /// # Errors
    /// If the message is invalid or cannot be written
    pub async fn enqueue(&self, email: &OutboundEmail) -> crate::Result<MessageId> {
        email.validate()?;

        let id = MessageId::generate();
        let filename = id.filename();
        let final_path = self.path.join(&filename);
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{filename}"));

        if fs::try_exists(&final_path).await.unwrap_or(false) {
            return Err(QueueError::Internal(format!("ULID collision detected: {id}")));
        }

        fs::write(&temp_path, serde_json::to_vec_pretty(email)?).await?;
        fs::rename(&temp_path, &final_path).await?;

        internal!(level = DEBUG, "Queued message {id} at {}", final_path.display());

        Ok(id)
    }

    /// Identifiers of every message in the directory, oldest first
    ///
    /// # Errors
    /// If the directory cannot be read
    pub async fn list(&self) -> crate::Result<Vec<MessageId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            if let Some(id) = MessageId::from_filename(&filename.to_string_lossy()) {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Times `id` has been leased so far, by this or any other process
    ///
    /// # Errors
    /// If its lease file cannot be read
    pub async fn receive_count(&self, id: &MessageId) -> crate::Result<u32> {
        Ok(self.read_lease(id).await?.map_or(0, |lease| lease.receipt))
    }

    fn lease_path(&self, id: &MessageId) -> PathBuf {
        self.path.join(id.filename()).with_extension(LEASE_EXTENSION)
    }

    /// An unreadable lease file counts as no lease, the message is handed
    /// out again rather than stuck.
    async fn read_lease(&self, id: &MessageId) -> crate::Result<Option<LeaseRecord>> {
        let content = match fs::read(self.lease_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice(&content) {
            Ok(lease) => Ok(Some(lease)),
            Err(e) => {
                tracing::warn!(message_id = %id, error = %e, "Ignoring malformed lease file");
                Ok(None)
            }
        }
    }

    async fn write_lease(&self, id: &MessageId, lease: &LeaseRecord) -> crate::Result<()> {
        let path = self.lease_path(id);
        let temp_path = self.path.join(format!("{TEMP_PREFIX}{id}.{LEASE_EXTENSION}"));

        fs::write(&temp_path, serde_json::to_vec(lease)?).await?;
        fs::rename(&temp_path, &path).await?;

        Ok(())
    }

    /// Read one message, moving it aside if it does not decode
    async fn read(&self, id: &MessageId) -> crate::Result<Option<OutboundEmail>> {
        let path = self.path.join(id.filename());

        let content = match fs::read(&path).await {
            Ok(content) => content,
            // Acknowledged since it was listed
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let decoded = serde_json::from_slice::<OutboundEmail>(&content)
            .map_err(QueueError::from)
            .and_then(|email| email.validate().map(|()| email));

        match decoded {
            Ok(email) => Ok(Some(email)),
            Err(e) => {
                let rejected = self.path.join(format!("{}{REJECTED_SUFFIX}", id.filename()));
                tracing::error!(
                    message_id = %id,
                    error = %e,
                    "Malformed queue file, moving it to {}",
                    rejected.display()
                );
                fs::rename(&path, &rejected).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl QueueSource for FileQueue {
    #[tracing::instrument(level = "debug", skip(self), fields(path = %self.path.display()))]
    async fn fetch_batch(&self, max_count: usize) -> crate::Result<Vec<PendingMessage>> {
        let max_count = max_count.min(self.fetch_limit);
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let ids = self.list().await.map_err(|e| match e {
            QueueError::Io(io) => QueueError::Unavailable(format!(
                "cannot read {}: {io}",
                self.path.display()
            )),
            other => other,
        })?;

        let now = now_ms();
        let mut leases = HashMap::new();
        for id in &ids {
            if let Some(lease) = self.read_lease(id).await? {
                leases.insert(id.clone(), lease);
            }
        }

        // Nothing else from a group may be handed out while one of its
        // messages is on lease, otherwise a retry could overtake it.
        let blocked: HashSet<&str> = leases
            .values()
            .filter(|lease| lease.is_live(now))
            .map(|lease| lease.group.as_str())
            .collect();

        let timeout_ms = u64::try_from(self.visibility_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut batch = Vec::new();
        for id in &ids {
            if batch.len() >= max_count {
                break;
            }

            let previous = leases.get(id);
            if previous.is_some_and(|lease| lease.is_live(now)) {
                continue;
            }

            let Some(email) = self.read(id).await? else {
                continue;
            };
            if blocked.contains(email.message_group_id.as_str()) {
                continue;
            }

            let lease = LeaseRecord {
                receipt: previous.map_or(0, |lease| lease.receipt).saturating_add(1),
                group: email.message_group_id.clone(),
                expires_at_ms: now.saturating_add(timeout_ms),
            };
            self.write_lease(id, &lease).await?;

            let handle = DeliveryHandle::for_lease(id, lease.receipt);
            batch.push(email.into_pending(handle, lease.receipt));
        }

        internal!(level = DEBUG, "Leased {} of {} queued messages", batch.len(), ids.len());

        Ok(batch)
    }

    async fn acknowledge(&self, handle: &DeliveryHandle) -> crate::Result<()> {
        let (id, _) = handle
            .lease_parts()
            .ok_or_else(|| QueueError::InvalidHandle(handle.to_string()))?;

        if !remove_if_present(&self.path.join(id.filename())).await? {
            internal!(level = DEBUG, "Message {id} already removed");
        }
        remove_if_present(&self.lease_path(&id)).await?;

        Ok(())
    }

    async fn release(&self, handle: &DeliveryHandle) -> crate::Result<()> {
        let (id, receipt) = handle
            .lease_parts()
            .ok_or_else(|| QueueError::InvalidHandle(handle.to_string()))?;

        let now = now_ms();
        match self.read_lease(&id).await? {
            Some(lease) if lease.receipt == receipt && lease.is_live(now) => {
                let released = LeaseRecord {
                    expires_at_ms: now,
                    ..lease
                };
                self.write_lease(&id, &released).await
            }
            _ => {
                internal!(level = DEBUG, "Lease {handle} is no longer current, nothing to release");
                Ok(())
            }
        }
    }
}

/// Builder for [`FileQueue`]
#[derive(Debug)]
pub struct FileQueueBuilder {
    path: PathBuf,
    visibility_timeout: Duration,
    fetch_limit: usize,
}

impl Default for FileQueueBuilder {
    fn default() -> Self {
        let defaults = FileQueue::default();
        Self {
            path: defaults.path,
            visibility_timeout: defaults.visibility_timeout,
            fetch_limit: defaults.fetch_limit,
        }
    }
}

impl FileQueueBuilder {
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    #[must_use]
    pub const fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn fetch_limit(mut self, limit: usize) -> Self {
        self.fetch_limit = limit;
        self
    }

    /// # Errors
    /// If the path is invalid or the limits are zero
    pub fn build(self) -> crate::Result<FileQueue> {
        FileQueue::validate_path(&self.path)?;

        if self.visibility_timeout.is_zero() {
            return Err(QueueError::Configuration(
                "visibility timeout must be greater than zero".to_string(),
            ));
        }

        if self.fetch_limit == 0 {
            return Err(QueueError::Configuration(
                "fetch limit must be greater than zero".to_string(),
            ));
        }

        Ok(FileQueue {
            path: self.path,
            visibility_timeout: self.visibility_timeout,
            fetch_limit: self.fetch_limit,
        })
    }
}
