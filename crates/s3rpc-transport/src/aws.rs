//! Amazon S3 and SQS implementations.
//!
//! Clients are built directly from a [`ConnectionConfig`] with static
//! credentials. When `endpoint_url` is set, requests go to that endpoint
//! with path-style bucket addressing, which is what LocalStack-compatible
//! emulators expect.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use s3rpc_core::{BoxError, ConnectionConfig, Metadata, ReceiveSettings, TransportError};
use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::{NotificationQueue, ObjectStore, RawMessage};

/// Credential provider name reported to the SDK.
const PROVIDER_NAME: &str = "s3rpc";

/// Render an SDK error with its full cause chain.
fn sdk_error<E>(err: E) -> BoxError
where
    E: std::error::Error + Send + Sync + 'static,
{
    DisplayErrorContext(err).to_string().into()
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
    move |source| TransportError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Whole seconds, saturating, as the SDK's `i32` fields expect.
fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// [`ObjectStore`] backed by Amazon S3.
#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a client from connection parameters.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            PROVIDER_NAME,
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(url) = &config.endpoint_url {
            builder = builder.endpoint_url(url).force_path_style(true);
        }

        Self::new(aws_sdk_s3::Client::from_conf(builder.build()))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: &Path,
        metadata: &Metadata,
    ) -> Result<(), TransportError> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| TransportError::Io {
                path: source.to_owned(),
                source: std::io::Error::other(e),
            })?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .set_metadata((!metadata.is_empty()).then(|| metadata.clone()))
            .send()
            .await
            .map_err(|e| TransportError::Store {
                action: "upload",
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source: sdk_error(e),
            })?;

        debug!(bucket, key, "put object");
        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
    ) -> Result<Metadata, TransportError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| TransportError::Store {
                action: "download",
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source: sdk_error(e),
            })?;

        let metadata = output.metadata().cloned().unwrap_or_default();
        let mut body = output.body.into_async_read();

        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(io_error(dest))?;
        let size = tokio::io::copy(&mut body, &mut file)
            .await
            .map_err(io_error(dest))?;
        file.flush().await.map_err(io_error(dest))?;

        debug!(bucket, key, size, "got object");
        Ok(metadata)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), TransportError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| TransportError::Store {
                action: "delete",
                bucket: bucket.to_owned(),
                key: key.to_owned(),
                source: sdk_error(e),
            })?;
        trace!(bucket, key, "deleted object");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQS
// ---------------------------------------------------------------------------

/// [`NotificationQueue`] backed by Amazon SQS. Queues are addressed by URL.
#[derive(Debug, Clone)]
pub struct SqsNotificationQueue {
    client: aws_sdk_sqs::Client,
}

impl SqsNotificationQueue {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: aws_sdk_sqs::Client) -> Self {
        Self { client }
    }

    /// Build a client from connection parameters.
    #[must_use]
    pub fn from_config(config: &ConnectionConfig) -> Self {
        use aws_sdk_sqs::config::{BehaviorVersion, Credentials, Region};

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            PROVIDER_NAME,
        );

        let mut builder = aws_sdk_sqs::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(url) = &config.endpoint_url {
            builder = builder.endpoint_url(url);
        }

        Self::new(aws_sdk_sqs::Client::from_conf(builder.build()))
    }

    fn queue_error<E>(action: &'static str, queue: &str) -> impl FnOnce(E) -> TransportError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let queue = queue.to_owned();
        move |e| TransportError::Queue {
            action,
            queue,
            source: sdk_error(e),
        }
    }
}

#[async_trait]
impl NotificationQueue for SqsNotificationQueue {
    async fn receive(
        &self,
        queue: &str,
        settings: &ReceiveSettings,
    ) -> Result<Vec<RawMessage>, TransportError> {
        let output = self
            .client
            .receive_message()
            .queue_url(queue)
            .max_number_of_messages(i32::from(settings.max_messages))
            .visibility_timeout(seconds(settings.lease))
            .wait_time_seconds(seconds(settings.wait))
            .send()
            .await
            .map_err(Self::queue_error("receive", queue))?;

        let messages = output
            .messages()
            .iter()
            .map(|m| {
                let receipt_handle =
                    m.receipt_handle()
                        .ok_or_else(|| TransportError::Queue {
                            action: "receive",
                            queue: queue.to_owned(),
                            source: "message without receipt handle".into(),
                        })?;
                Ok(RawMessage {
                    body: m.body().unwrap_or_default().to_owned(),
                    receipt_handle: receipt_handle.to_owned(),
                })
            })
            .collect::<Result<Vec<_>, TransportError>>()?;

        trace!(queue, count = messages.len(), "received messages");
        Ok(messages)
    }

    async fn delete_message(
        &self,
        queue: &str,
        receipt_handle: &str,
    ) -> Result<(), TransportError> {
        self.client
            .delete_message()
            .queue_url(queue)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(Self::queue_error("delete message", queue))?;
        Ok(())
    }

    async fn reset_lease(
        &self,
        queue: &str,
        receipt_handle: &str,
        lease: Duration,
    ) -> Result<(), TransportError> {
        self.client
            .change_message_visibility()
            .queue_url(queue)
            .receipt_handle(receipt_handle)
            .visibility_timeout(seconds(lease))
            .send()
            .await
            .map_err(Self::queue_error("change visibility", queue))?;
        Ok(())
    }
}
