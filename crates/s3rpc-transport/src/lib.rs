//! Object store and notification queue capabilities for s3rpc.
//!
//! The protocol only needs a handful of calls from each service:
//!
//! ```text
//! ObjectStore           upload / download / delete
//! NotificationQueue     receive / delete_message / reset_lease
//! ```
//!
//! Both traits are object safe (`Arc<dyn ObjectStore>`) and carry no
//! protocol logic. Two implementations ship with the crate:
//!
//! - [`aws`]: Amazon S3 and SQS through the AWS SDK, or any compatible
//!   endpoint.
//! - [`memory`]: an in-process broker with leases, long polling and bucket
//!   event notifications, used by tests and local runs.

pub mod aws;
pub mod memory;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use s3rpc_core::{ConnectionConfig, Metadata, ReceiveSettings, TransportError};

pub use aws::{S3ObjectStore, SqsNotificationQueue};
pub use memory::{InMemoryBroker, MemoryError};

/// A queue message as delivered, before its body is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Message body, an event notification document.
    pub body: String,
    /// Lease token for this delivery.
    pub receipt_handle: String,
}

/// Keyed object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + fmt::Debug {
    /// Stream the file at `source` to `bucket/key` with `metadata` attached.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &Metadata,
    ) -> Result<(), TransportError>;

    /// Write `bucket/key` into the file at `dest` and return its metadata.
    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Metadata, TransportError>;

    /// Remove `bucket/key`.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), TransportError>;
}

/// Leased, at-least-once message queue.
#[async_trait]
pub trait NotificationQueue: Send + Sync + fmt::Debug {
    /// Receive up to `settings.max_messages`, leasing them for
    /// `settings.lease` and waiting up to `settings.wait` for one to arrive.
    async fn receive(
        &self,
        queue: &str,
        settings: &ReceiveSettings,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Permanently remove a received message.
    async fn delete_message(&self, queue: &str, receipt_handle: &str)
    -> Result<(), TransportError>;

    /// Set the remaining lease of a received message; zero makes it
    /// immediately receivable again.
    async fn reset_lease(
        &self,
        queue: &str,
        receipt_handle: &str,
        lease: Duration,
    ) -> Result<(), TransportError>;
}

/// The pair of services one endpoint talks to.
#[derive(Debug, Clone)]
pub struct Transport {
    /// Payload storage.
    pub store: Arc<dyn ObjectStore>,
    /// Notification queue service.
    pub queue: Arc<dyn NotificationQueue>,
}

impl Transport {
    /// Combine arbitrary implementations.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, queue: Arc<dyn NotificationQueue>) -> Self {
        Self { store, queue }
    }

    /// S3 and SQS clients for `config`.
    #[must_use]
    pub fn aws(config: &ConnectionConfig) -> Self {
        Self {
            store: Arc::new(S3ObjectStore::from_config(config)),
            queue: Arc::new(SqsNotificationQueue::from_config(config)),
        }
    }

    /// Both capabilities served by one in-memory broker.
    #[must_use]
    pub fn in_memory(broker: &Arc<InMemoryBroker>) -> Self {
        Self {
            store: Arc::clone(broker) as Arc<dyn ObjectStore>,
            queue: Arc::clone(broker) as Arc<dyn NotificationQueue>,
        }
    }
}
