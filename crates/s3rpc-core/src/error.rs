//! Error types for s3rpc.
//!
//! Errors are split by where they originate: construction ([`ConfigError`]),
//! object key handling ([`KeyError`]), incoming notifications
//! ([`ProtocolError`]) and the object store / queue services
//! ([`TransportError`]). [`RpcError`] is what `Server` and `Client`
//! operations return. Every variant except the advisory cleanup path is
//! fatal to the loop that produced it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Boxed error used as the source of transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A required configuration field is absent or invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A required field was empty.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// An operation name registered on the server is not usable in a key.
    #[error("invalid operation name {0:?}: {1}")]
    InvalidOperation(String, KeyError),
}

/// Errors building or parsing an object key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// The operation name was empty.
    #[error("operation name must not be empty")]
    EmptyOperation,

    /// The operation name contains the key separator.
    #[error("operation name {0:?} must not contain '/'")]
    OperationContainsSeparator(String),

    /// The request filename has no usable base name.
    #[error("filename {0:?} has no base name")]
    MissingBaseName(String),

    /// The base name contains the key separator.
    #[error("base name {0:?} must not contain '/'")]
    BaseNameContainsSeparator(String),

    /// The key is not of the form `<direction>/<operation>/<basename>`.
    #[error("malformed key {0:?}: expected <direction>/<operation>/<basename>")]
    Malformed(String),

    /// The leading key segment is neither `to_server` nor `to_client`.
    #[error("unknown direction {direction:?} in key {key:?}")]
    UnknownDirection {
        /// The full key.
        key: String,
        /// The leading segment that failed to parse.
        direction: String,
    },
}

/// A notification violated the protocol.
///
/// These indicate a misconfiguration affecting every message (wrong bucket,
/// wrong queue, foreign writers), so they abort the loop instead of skipping
/// the message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The notification refers to a bucket other than the configured one.
    #[error("expected bucket {expected:?}, got {actual:?}")]
    BucketMismatch {
        /// The configured bucket.
        expected: String,
        /// The bucket named by the notification.
        actual: String,
    },

    /// The message body is not a valid event notification.
    #[error("malformed notification: {0}")]
    MalformedNotification(#[source] serde_json::Error),

    /// A notification carried more than one record.
    #[error("expected only one record, got {0}")]
    TooManyRecords(usize),

    /// The notification names a key that does not follow the key scheme.
    #[error("invalid object key in notification: {0}")]
    InvalidKey(#[source] KeyError),

    /// A key arrived on a queue that serves the other direction.
    #[error("key {key:?} arrived on the {expected} queue")]
    UnexpectedDirection {
        /// The offending key.
        key: String,
        /// The direction this queue serves.
        expected: &'static str,
    },
}

/// A call to the object store, queue service or local filesystem failed.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An object store request failed.
    #[error("{action} {bucket}/{key} failed: {source}")]
    Store {
        /// The store action, e.g. `upload`.
        action: &'static str,
        /// Bucket of the object.
        bucket: String,
        /// Key of the object.
        key: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// A queue request failed.
    #[error("{action} on queue {queue} failed: {source}")]
    Queue {
        /// The queue action, e.g. `receive`.
        action: &'static str,
        /// Queue URL or name.
        queue: String,
        /// Underlying failure.
        #[source]
        source: BoxError,
    },

    /// Reading or writing a local payload file failed.
    #[error("local file {}: {source}", path.display())]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by `Server` and `Client` operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Invalid configuration at construction.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The request could not be expressed as an object key.
    #[error("invalid request: {0}")]
    Key(#[from] KeyError),

    /// A notification violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An object store or queue call failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// A registered handler failed.
    #[error("handle {operation}: {source}")]
    Handler {
        /// The operation whose handler failed.
        operation: String,
        /// The handler's error.
        #[source]
        source: anyhow::Error,
    },

    /// No matching response arrived within the call timeout.
    #[error("no response for {operation} within {timeout:?}")]
    Timeout {
        /// The operation that was called.
        operation: String,
        /// The configured call timeout.
        timeout: Duration,
    },

    /// Creating, keeping or removing scratch files failed.
    #[error("scratch directory: {0}")]
    Scratch(#[source] Arc<std::io::Error>),

    /// The client or server was already closed.
    #[error("already closed")]
    Closed,
}

/// Convenience result type for s3rpc operations.
pub type RpcResult<T> = Result<T, RpcError>;
