//! Fixtures for protocol tests on the in-memory broker.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use std::time::Duration;

use s3rpc_core::{ConnectionConfig, ReceiveSettings};
use s3rpc_transport::{InMemoryBroker, Transport};

use crate::{Client, ClientOptions, Handlers, Server, ServerOptions};

pub(crate) const BUCKET: &str = "s3fptest";
pub(crate) const SERVER_QUEUE: &str = "s3rpc-server";
pub(crate) const CLIENT_QUEUE: &str = "s3rpc-client";

static INIT: Once = Once::new();

pub(crate) fn init_tracing() {
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

/// A broker with the bucket, both queues and prefix routing in place.
pub(crate) fn broker() -> Arc<InMemoryBroker> {
    init_tracing();
    let broker = Arc::new(InMemoryBroker::new());
    broker.create_bucket(BUCKET);
    broker.create_queue(SERVER_QUEUE);
    broker.create_queue(CLIENT_QUEUE);
    broker
        .add_notification(BUCKET, "to_server/", SERVER_QUEUE)
        .expect("route requests");
    broker
        .add_notification(BUCKET, "to_client/", CLIENT_QUEUE)
        .expect("route responses");
    broker
}

pub(crate) fn connection() -> ConnectionConfig {
    ConnectionConfig::builder()
        .bucket(BUCKET)
        .access_key_id("test")
        .secret_access_key("test")
        .build()
}

/// Short long-poll so idle loops notice close quickly.
pub(crate) fn receive() -> ReceiveSettings {
    ReceiveSettings::builder()
        .wait(Duration::from_millis(200))
        .build()
}

pub(crate) fn server(broker: &Arc<InMemoryBroker>, handlers: Handlers) -> Arc<Server> {
    let options = ServerOptions::builder()
        .handlers(handlers)
        .queue(SERVER_QUEUE)
        .poll_interval(Duration::from_millis(10))
        .connection(connection())
        .receive(receive())
        .build();
    Arc::new(Server::with_transport(options, Transport::in_memory(broker)).expect("server"))
}

pub(crate) fn client(broker: &Arc<InMemoryBroker>, timeout: Duration) -> Client {
    let options = ClientOptions::builder()
        .queue(CLIENT_QUEUE)
        .timeout(timeout)
        .connection(connection())
        .receive(receive())
        .build();
    Client::with_transport(options, Transport::in_memory(broker)).expect("client")
}

/// Write `content` to `dir/name`.
pub(crate) fn payload(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write payload");
    path
}

/// An S3 event body for `bucket/key`.
pub(crate) fn notification(bucket: &str, key: &str) -> String {
    s3rpc_core::S3EventNotification::object_created(bucket, key, 0, s3rpc_core::DEFAULT_REGION)
        .to_body()
}
