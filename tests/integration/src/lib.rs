//! Live integration tests for s3rpc.
//!
//! These tests need an AWS-compatible endpoint with S3 and SQS (for example
//! LocalStack) at `S3RPC_ENDPOINT_URL` (default `http://localhost:4566`).
//! Each test provisions its own bucket, queues and bucket notifications and
//! removes them afterwards. They are marked `#[ignore]` so they don't run
//! during normal `cargo test`.
//!
//! Run them with:
//! ```text
//! cargo test -p s3rpc-integration -- --ignored
//! ```

use std::sync::Once;

use anyhow::{Context, Result};
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::types::{
    Event, FilterRule, FilterRuleName, NotificationConfiguration,
    NotificationConfigurationFilter, QueueConfiguration, S3KeyFilter,
};
use aws_sdk_sqs::types::QueueAttributeName;
use s3rpc::ConnectionConfig;

static INIT: Once = Once::new();

const ACCESS_KEY_ID: &str = "test";
const SECRET_ACCESS_KEY: &str = "test";
const REGION: &str = "us-east-1";

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// Endpoint URL for the services.
fn endpoint_url() -> String {
    std::env::var("S3RPC_ENDPOINT_URL").unwrap_or_else(|_| "http://localhost:4566".to_owned())
}

/// Create an S3 client pointing at the endpoint.
#[must_use]
pub fn s3_client() -> aws_sdk_s3::Client {
    init_tracing();

    let creds = Credentials::new(ACCESS_KEY_ID, SECRET_ACCESS_KEY, None, None, "integration-test");
    let config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(REGION))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .force_path_style(true)
        .build();

    aws_sdk_s3::Client::from_conf(config)
}

/// Create an SQS client pointing at the endpoint.
#[must_use]
pub fn sqs_client() -> aws_sdk_sqs::Client {
    init_tracing();

    let creds = aws_sdk_sqs::config::Credentials::new(
        ACCESS_KEY_ID,
        SECRET_ACCESS_KEY,
        None,
        None,
        "integration-test",
    );
    let config = aws_sdk_sqs::config::Builder::new()
        .behavior_version(aws_sdk_sqs::config::BehaviorVersion::latest())
        .region(aws_sdk_sqs::config::Region::new(REGION))
        .credentials_provider(creds)
        .endpoint_url(endpoint_url())
        .build();

    aws_sdk_sqs::Client::from_conf(config)
}

/// Bucket and queues wired together for one test.
#[derive(Debug)]
pub struct Fixture {
    /// Bucket holding payloads.
    pub bucket: String,
    /// URL of the request queue.
    pub server_queue: String,
    /// URL of the response queue.
    pub client_queue: String,
    s3: aws_sdk_s3::Client,
    sqs: aws_sdk_sqs::Client,
}

impl Fixture {
    /// Create a uniquely named bucket and queue pair and route
    /// `to_server/` uploads to the server queue and `to_client/` uploads to
    /// the client queue.
    pub async fn provision(prefix: &str) -> Result<Self> {
        let s3 = s3_client();
        let sqs = sqs_client();
        let id = uuid::Uuid::new_v4().to_string()[..8].to_owned();
        let bucket = format!("s3rpc-{prefix}-{id}");

        s3.create_bucket()
            .bucket(&bucket)
            .send()
            .await
            .with_context(|| format!("create bucket {bucket}"))?;

        let server_queue = create_queue(&sqs, &format!("{bucket}-server")).await?;
        let client_queue = create_queue(&sqs, &format!("{bucket}-client")).await?;

        let routes = [
            ("to_server/", queue_arn(&sqs, &server_queue).await?),
            ("to_client/", queue_arn(&sqs, &client_queue).await?),
        ];
        let mut notifications = NotificationConfiguration::builder();
        for (key_prefix, arn) in routes {
            let filter = NotificationConfigurationFilter::builder()
                .key(
                    S3KeyFilter::builder()
                        .filter_rules(
                            FilterRule::builder()
                                .name(FilterRuleName::Prefix)
                                .value(key_prefix)
                                .build(),
                        )
                        .build(),
                )
                .build();
            notifications = notifications.queue_configurations(
                QueueConfiguration::builder()
                    .queue_arn(arn)
                    .events(Event::S3ObjectCreated)
                    .filter(filter)
                    .build()
                    .context("queue configuration")?,
            );
        }
        s3.put_bucket_notification_configuration()
            .bucket(&bucket)
            .notification_configuration(notifications.build())
            .send()
            .await
            .context("put bucket notification configuration")?;

        Ok(Self {
            bucket,
            server_queue,
            client_queue,
            s3,
            sqs,
        })
    }

    /// Connection parameters for either side.
    #[must_use]
    pub fn connection(&self) -> ConnectionConfig {
        ConnectionConfig::builder()
            .region(REGION)
            .bucket(self.bucket.clone())
            .access_key_id(ACCESS_KEY_ID)
            .secret_access_key(SECRET_ACCESS_KEY)
            .endpoint_url(endpoint_url())
            .build()
    }

    /// Keys currently in the bucket.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let resp = self
            .s3
            .list_objects_v2()
            .bucket(&self.bucket)
            .send()
            .await
            .context("list objects")?;
        Ok(resp
            .contents()
            .iter()
            .filter_map(|o| o.key().map(ToOwned::to_owned))
            .collect())
    }

    /// Delete all objects, the bucket and both queues.
    pub async fn cleanup(self) {
        if let Ok(keys) = self.keys().await {
            for key in keys {
                let _ = self
                    .s3
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send()
                    .await;
            }
        }
        let _ = self.s3.delete_bucket().bucket(&self.bucket).send().await;
        for queue in [&self.server_queue, &self.client_queue] {
            let _ = self.sqs.delete_queue().queue_url(queue).send().await;
        }
    }
}

async fn create_queue(sqs: &aws_sdk_sqs::Client, name: &str) -> Result<String> {
    let resp = sqs
        .create_queue()
        .queue_name(name)
        .send()
        .await
        .with_context(|| format!("create queue {name}"))?;
    resp.queue_url()
        .map(ToOwned::to_owned)
        .with_context(|| format!("queue {name} has no url"))
}

async fn queue_arn(sqs: &aws_sdk_sqs::Client, url: &str) -> Result<String> {
    let resp = sqs
        .get_queue_attributes()
        .queue_url(url)
        .attribute_names(QueueAttributeName::QueueArn)
        .send()
        .await
        .with_context(|| format!("get attributes of {url}"))?;
    resp.attributes()
        .and_then(|a| a.get(&QueueAttributeName::QueueArn))
        .cloned()
        .with_context(|| format!("queue {url} has no arn"))
}

mod test_roundtrip;
