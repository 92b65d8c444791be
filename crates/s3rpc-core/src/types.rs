//! Payload and message types shared by client and server.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

/// User metadata attached to a stored object.
pub type Metadata = HashMap<String, String>;

/// Input to a handler invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Input {
    /// Path to the locally staged request payload.
    pub filename: PathBuf,
    /// Metadata carried from the request object.
    pub metadata: Metadata,
}

impl Input {
    /// Create an input for `filename` with no metadata.
    #[must_use]
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Result of a handler invocation, and of a client call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Output {
    /// Path to the locally staged response payload.
    pub filename: PathBuf,
    /// Metadata to attach to, or read from, the response object.
    pub metadata: Metadata,
}

impl Output {
    /// Create an output for `filename` with no metadata.
    #[must_use]
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A decoded object notification, valid for one receive cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Bucket the object was written to.
    pub bucket: String,
    /// Key of the object.
    pub key: String,
    /// Lease token used to delete or release the queue message.
    pub receipt_handle: String,
}

/// Unique token pairing one client call with its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether `key`'s last segment carries this identifier.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        let basename = key.rsplit('/').next().unwrap_or(key);
        basename.contains(&self.to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
