use std::sync::LazyLock;

use parking_lot::Mutex;

static GENERATOR: LazyLock<Mutex<ulid::Generator>> =
    LazyLock::new(|| Mutex::new(ulid::Generator::new()));

/// Identifier for a queued message
///
/// A ULID drawn from a monotonic generator, so identifiers created by this
/// process sort in enqueue order even within the same millisecond. It doubles
/// as the file stem for spool-directory queues.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId {
    id: ulid::Ulid,
}

impl MessageId {
    /// Parse a message ID from a filename like `01ARZ3NDEKTSV4RRFFQ69G5FAV.json`
    ///
    /// Rejects path separators, traversal patterns and anything that is not a
    /// valid ULID, so only files the queue wrote itself are ever picked up.
    pub fn from_filename(filename: &str) -> Option<Self> {
        if filename.contains('/') || filename.contains('\\') || filename.contains("..") {
            return None;
        }

        let stem = filename.strip_suffix(".json")?;
        let id = ulid::Ulid::from_string(stem).ok()?;

        Some(Self { id })
    }

    #[must_use]
    pub const fn new(id: ulid::Ulid) -> Self {
        Self { id }
    }

    /// Generate a new identifier, later than any generated before it
    #[must_use]
    pub fn generate() -> Self {
        let id = GENERATOR
            .lock()
            .generate()
            .unwrap_or_else(|_| ulid::Ulid::new());

        Self { id }
    }

    #[must_use]
    pub const fn ulid(&self) -> ulid::Ulid {
        self.id
    }

    /// Milliseconds since the Unix epoch at which the message was enqueued
    #[must_use]
    pub const fn timestamp_ms(&self) -> u64 {
        self.id.timestamp_ms()
    }

    pub(crate) fn filename(&self) -> String {
        format!("{}.json", self.id)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl std::str::FromStr for MessageId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self {
            id: ulid::Ulid::from_string(s)?,
        })
    }
}

/// Opaque token needed to acknowledge or release a fetched message
///
/// Backends decide what goes in it. The bundled ones encode the message ID
/// and the receive number of the lease, so a handle from an expired lease can
/// still acknowledge the message but can no longer release someone else's
/// lease on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct DeliveryHandle(String);

impl DeliveryHandle {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn for_lease(id: &MessageId, receipt: u32) -> Self {
        Self(format!("{id}:{receipt}"))
    }

    /// Split a handle minted by [`Self::for_lease`]
    pub(crate) fn lease_parts(&self) -> Option<(MessageId, u32)> {
        let (id, receipt) = self.0.split_once(':')?;
        Some((id.parse().ok()?, receipt.parse().ok()?))
    }
}

impl std::fmt::Display for DeliveryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
