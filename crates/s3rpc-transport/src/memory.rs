//! In-process object store and queue broker.
//!
//! [`InMemoryBroker`] implements both [`ObjectStore`] and
//! [`NotificationQueue`] and wires them together the way a bucket with event
//! notifications does: every upload whose key matches a configured prefix
//! publishes an `ObjectCreated:Put` document to the routed queue, after the
//! object is stored.
//!
//! Queue semantics follow SQS standard queues closely enough for the
//! protocol: receives lease messages and hand out a fresh receipt handle per
//! delivery, expired leases make messages visible again, a lease reset to
//! zero re-offers immediately, and empty receives long-poll up to the
//! requested wait.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use s3rpc_core::ReceiveSettings;
//! use s3rpc_transport::{InMemoryBroker, NotificationQueue};
//!
//! let broker = Arc::new(InMemoryBroker::new());
//! broker.create_bucket("payloads");
//! broker.create_queue("server");
//! broker.add_notification("payloads", "to_server/", "server").unwrap();
//! broker.send_message("server", "{}").unwrap();
//!
//! let settings = ReceiveSettings::builder().wait(Duration::ZERO).build();
//! # tokio_test::block_on(async {
//! let batch = broker.receive("server", &settings).await.unwrap();
//! assert_eq!(batch.len(), 1);
//! assert_eq!(broker.visible_count("server"), Some(0));
//! # });
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use s3rpc_core::{
    DEFAULT_REGION, Metadata, ReceiveSettings, S3EventNotification, TransportError,
};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::{NotificationQueue, ObjectStore, RawMessage};

/// Failures reported by the in-memory broker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// The bucket was never created.
    #[error("the specified bucket does not exist: {0}")]
    NoSuchBucket(String),

    /// No object under this key.
    #[error("the specified key does not exist: {0}")]
    NoSuchKey(String),

    /// The queue was never created.
    #[error("the specified queue does not exist: {0}")]
    NoSuchQueue(String),

    /// The receipt handle is unknown or belongs to an expired delivery.
    #[error("the receipt handle is not valid: {0}")]
    InvalidReceiptHandle(String),
}

/// A stored object body and its user metadata.
#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: Metadata,
}

/// Bucket notification rule: keys under `prefix` are announced on `queue`.
#[derive(Debug, Clone)]
struct NotificationRoute {
    prefix: String,
    queue: String,
}

#[derive(Debug)]
struct QueuedMessage {
    body: String,
    visible_at: Instant,
    receipt_handle: Option<String>,
    receive_count: u32,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    messages: Mutex<Vec<QueuedMessage>>,
    arrived: Notify,
}

impl MemoryQueue {
    fn push(&self, body: String) {
        self.messages.lock().push(QueuedMessage {
            body,
            visible_at: Instant::now(),
            receipt_handle: None,
            receive_count: 0,
        });
        self.arrived.notify_waiters();
    }

    /// Lease up to `max` visible messages. Also returns the earliest time a
    /// currently leased message becomes visible again.
    fn lease_visible(
        &self,
        max: usize,
        lease: Duration,
        now: Instant,
    ) -> (Vec<RawMessage>, Option<Instant>) {
        let mut messages = self.messages.lock();
        let mut batch = Vec::new();
        let mut next_visible: Option<Instant> = None;

        for message in messages.iter_mut() {
            if message.visible_at > now {
                next_visible = Some(
                    next_visible.map_or(message.visible_at, |t| t.min(message.visible_at)),
                );
                continue;
            }
            if batch.len() >= max {
                continue;
            }
            let receipt_handle = uuid::Uuid::new_v4().to_string();
            message.receipt_handle = Some(receipt_handle.clone());
            message.visible_at = now + lease;
            message.receive_count += 1;
            batch.push(RawMessage {
                body: message.body.clone(),
                receipt_handle,
            });
        }

        (batch, next_visible)
    }

    fn position(messages: &[QueuedMessage], receipt_handle: &str) -> Option<usize> {
        messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle))
    }
}

/// In-memory buckets and queues with S3-style event notifications.
///
/// Thread-safe; share it behind an [`Arc`] between any number of clients
/// and servers.
#[derive(Debug)]
pub struct InMemoryBroker {
    region: String,
    /// Object data keyed by `(bucket, key)`.
    objects: DashMap<(String, String), StoredObject>,
    /// Bucket name to its notification routes.
    buckets: DashMap<String, Vec<NotificationRoute>>,
    /// Queue name to queue.
    queues: DashMap<String, Arc<MemoryQueue>>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            region: DEFAULT_REGION.to_owned(),
            objects: DashMap::new(),
            buckets: DashMap::new(),
            queues: DashMap::new(),
        }
    }

    /// Create a bucket. Creating an existing bucket is a no-op.
    pub fn create_bucket(&self, name: &str) {
        self.buckets.entry(name.to_owned()).or_default();
        debug!(bucket = name, "bucket created");
    }

    /// Create a queue. Creating an existing queue is a no-op.
    pub fn create_queue(&self, name: &str) {
        self.queues.entry(name.to_owned()).or_default();
        debug!(queue = name, "queue created");
    }

    /// Announce uploads to `bucket` under `prefix` on `queue`.
    pub fn add_notification(
        &self,
        bucket: &str,
        prefix: &str,
        queue: &str,
    ) -> Result<(), MemoryError> {
        if !self.queues.contains_key(queue) {
            return Err(MemoryError::NoSuchQueue(queue.to_owned()));
        }
        let mut routes = self
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| MemoryError::NoSuchBucket(bucket.to_owned()))?;
        routes.push(NotificationRoute {
            prefix: prefix.to_owned(),
            queue: queue.to_owned(),
        });
        Ok(())
    }

    /// Enqueue a raw message body, bypassing the object store.
    pub fn send_message(&self, queue: &str, body: impl Into<String>) -> Result<(), MemoryError> {
        self.queue(queue)?.push(body.into());
        Ok(())
    }

    /// Body and metadata of a stored object.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<(Bytes, Metadata)> {
        self.objects
            .get(&(bucket.to_owned(), key.to_owned()))
            .map(|o| (o.data.clone(), o.metadata.clone()))
    }

    /// Keys stored in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == bucket)
            .map(|entry| entry.key().1.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of messages in `queue`, leased or not.
    #[must_use]
    pub fn message_count(&self, queue: &str) -> Option<usize> {
        self.queues.get(queue).map(|q| q.messages.lock().len())
    }

    /// Number of messages in `queue` that a receive would return right now.
    #[must_use]
    pub fn visible_count(&self, queue: &str) -> Option<usize> {
        let now = Instant::now();
        self.queues.get(queue).map(|q| {
            q.messages
                .lock()
                .iter()
                .filter(|m| m.visible_at <= now)
                .count()
        })
    }

    /// How often each message in `queue` has been delivered, in queue order.
    #[must_use]
    pub fn receive_counts(&self, queue: &str) -> Option<Vec<u32>> {
        self.queues
            .get(queue)
            .map(|q| q.messages.lock().iter().map(|m| m.receive_count).collect())
    }

    fn queue(&self, name: &str) -> Result<Arc<MemoryQueue>, MemoryError> {
        self.queues
            .get(name)
            .map(|q| Arc::clone(q.value()))
            .ok_or_else(|| MemoryError::NoSuchQueue(name.to_owned()))
    }

    fn store_error(
        action: &'static str,
        bucket: &str,
        key: &str,
        err: MemoryError,
    ) -> TransportError {
        TransportError::Store {
            action,
            bucket: bucket.to_owned(),
            key: key.to_owned(),
            source: Box::new(err),
        }
    }

    fn queue_error(action: &'static str, queue: &str, err: MemoryError) -> TransportError {
        TransportError::Queue {
            action,
            queue: queue.to_owned(),
            source: Box::new(err),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryBroker {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &Metadata,
    ) -> Result<(), TransportError> {
        let data = tokio::fs::read(source)
            .await
            .map_err(|e| TransportError::Io {
                path: source.to_owned(),
                source: e,
            })?;
        let size = data.len() as u64;

        let routes = self
            .buckets
            .get(bucket)
            .map(|routes| routes.value().clone())
            .ok_or_else(|| {
                Self::store_error(
                    "upload",
                    bucket,
                    key,
                    MemoryError::NoSuchBucket(bucket.to_owned()),
                )
            })?;

        self.objects.insert(
            (bucket.to_owned(), key.to_owned()),
            StoredObject {
                data: Bytes::from(data),
                metadata: metadata.clone(),
            },
        );
        trace!(bucket, key, size, "stored object");

        for route in routes.iter().filter(|r| key.starts_with(&r.prefix)) {
            let body =
                S3EventNotification::object_created(bucket, key, size, &self.region).to_body();
            self.queue(&route.queue)
                .map_err(|e| Self::store_error("upload", bucket, key, e))?
                .push(body);
            trace!(bucket, key, queue = %route.queue, "published notification");
        }

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Metadata, TransportError> {
        let (data, metadata) = self.object(bucket, key).ok_or_else(|| {
            Self::store_error(
                "download",
                bucket,
                key,
                MemoryError::NoSuchKey(key.to_owned()),
            )
        })?;

        tokio::fs::write(dest, &data)
            .await
            .map_err(|e| TransportError::Io {
                path: dest.to_owned(),
                source: e,
            })?;
        Ok(metadata)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        if !self.buckets.contains_key(bucket) {
            return Err(Self::store_error(
                "delete",
                bucket,
                key,
                MemoryError::NoSuchBucket(bucket.to_owned()),
            ));
        }
        self.objects.remove(&(bucket.to_owned(), key.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl NotificationQueue for InMemoryBroker {
    async fn receive(
        &self,
        queue: &str,
        settings: &ReceiveSettings,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let target = self
            .queue(queue)
            .map_err(|e| Self::queue_error("receive", queue, e))?;

        // Every receive is a suspension point, as it would be over the network.
        tokio::task::yield_now().await;

        let deadline = Instant::now() + settings.wait;
        loop {
            let arrived = target.arrived.notified();
            let (batch, next_visible) = target.lease_visible(
                usize::from(settings.max_messages),
                settings.lease,
                Instant::now(),
            );
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(batch);
            }

            let wake_at = next_visible.map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                () = arrived => {}
                () = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn delete_message(
        &self,
        queue: &str,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        let target = self
            .queue(queue)
            .map_err(|e| Self::queue_error("delete message", queue, e))?;
        let mut messages = target.messages.lock();
        let index = MemoryQueue::position(&messages, receipt_handle).ok_or_else(|| {
            Self::queue_error(
                "delete message",
                queue,
                MemoryError::InvalidReceiptHandle(receipt_handle.to_owned()),
            )
        })?;
        messages.remove(index);
        Ok(())
    }

    async fn reset_lease(
        &self,
        queue: &str,
        receipt_handle: &str,
        lease: Duration,
    ) -> Result<(), TransportError> {
        let target = self
            .queue(queue)
            .map_err(|e| Self::queue_error("change visibility", queue, e))?;
        {
            let mut messages = target.messages.lock();
            let index = MemoryQueue::position(&messages, receipt_handle).ok_or_else(|| {
                Self::queue_error(
                    "change visibility",
                    queue,
                    MemoryError::InvalidReceiptHandle(receipt_handle.to_owned()),
                )
            })?;
            messages[index].visible_at = Instant::now() + lease;
        }
        target.arrived.notify_waiters();
        Ok(())
    }
}
