//! Client calls.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use s3rpc_core::{
    ConfigError, ConnectionConfig, CorrelationId, Direction, Input, Message, ObjectKey, Output,
    ProtocolError, ReceiveSettings, Role, RpcError, RpcResult, SharedLogSink, TracingSink, infof,
};
use s3rpc_transport::Transport;
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::endpoint::Endpoint;

/// Default upper bound for one call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Client construction options.
#[derive(TypedBuilder)]
pub struct ClientOptions {
    /// Queue receiving response notifications (a queue URL on SQS).
    #[builder(setter(into))]
    pub queue: String,

    /// How long a call waits for its response.
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,

    /// Progress log; defaults to `tracing` tagged `client`.
    #[builder(default, setter(strip_option))]
    pub log_sink: Option<SharedLogSink>,

    /// Bucket, region and credentials.
    pub connection: ConnectionConfig,

    /// Receive batch size, lease and wait.
    #[builder(default)]
    pub receive: ReceiveSettings,
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("queue", &self.queue)
            .field("timeout", &self.timeout)
            .field("connection", &self.connection)
            .field("receive", &self.receive)
            .finish_non_exhaustive()
    }
}

/// Executes operations on a remote server.
///
/// A client can run any number of calls concurrently, and several clients
/// can share one response queue: responses belonging to other calls are
/// released back to the queue untouched.
#[derive(Debug)]
pub struct Client {
    endpoint: Endpoint,
    timeout: Duration,
}

impl Client {
    /// Build a client talking to S3 and SQS.
    pub fn new(mut options: ClientOptions) -> RpcResult<Self> {
        options.connection.validate()?;
        let transport = Transport::aws(&options.connection);
        Self::with_transport(options, transport)
    }

    /// Build a client on an explicit transport.
    pub fn with_transport(options: ClientOptions, transport: Transport) -> RpcResult<Self> {
        let ClientOptions {
            queue,
            timeout,
            log_sink,
            mut connection,
            receive,
        } = options;

        connection.validate()?;
        if queue.is_empty() {
            return Err(ConfigError::MissingField("queue").into());
        }

        let log = log_sink.unwrap_or_else(|| Arc::new(TracingSink::new(Role::Client)));
        let endpoint = Endpoint::new(
            Role::Client,
            connection.bucket,
            queue,
            transport,
            receive,
            log,
        )?;
        Ok(Self { endpoint, timeout })
    }

    /// Run `operation` with the file at `filename` as input.
    ///
    /// Blocks until the response arrives or the timeout elapses. The returned
    /// [`Output::filename`] lives in the client's scratch directory and is
    /// removed by [`close`](Self::close).
    pub async fn execute(&self, operation: &str, filename: impl AsRef<Path>) -> RpcResult<Output> {
        self.execute_input(operation, Input::new(filename.as_ref()))
            .await
    }

    /// Like [`execute`](Self::execute), attaching `input.metadata` to the
    /// request object.
    pub async fn execute_input(&self, operation: &str, input: Input) -> RpcResult<Output> {
        if self.endpoint.is_closed() {
            return Err(RpcError::Closed);
        }

        let id = CorrelationId::new();
        let request = ObjectKey::request(operation, &id, &input.filename)?.to_string();

        self.endpoint
            .upload(&input.filename, &request, &input.metadata)
            .await?;

        match tokio::time::timeout(self.timeout, self.await_response(&id, &request)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(operation, %id, timeout = ?self.timeout, "call timed out");
                Err(RpcError::Timeout {
                    operation: operation.to_owned(),
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn await_response(&self, id: &CorrelationId, request: &str) -> RpcResult<Output> {
        loop {
            let mut messages = self.endpoint.receive().await?.into_iter();

            while let Some(message) = messages.next() {
                self.endpoint.ensure_bucket(&message)?;

                if !id.matches(&message.key) {
                    self.endpoint.release(&message).await?;
                    continue;
                }

                let output = self.accept(&message, request).await?;
                self.release_rest(messages).await;
                return Ok(output);
            }
        }
    }

    /// Take ownership of our response and download it.
    async fn accept(&self, message: &Message, request: &str) -> RpcResult<Output> {
        let key = ObjectKey::parse(&message.key).map_err(ProtocolError::InvalidKey)?;
        if key.direction != Direction::ToClient {
            return Err(ProtocolError::UnexpectedDirection {
                key: message.key.clone(),
                expected: Role::Client.as_str(),
            }
            .into());
        }

        self.endpoint.commit(message).await?;

        let file = self.endpoint.scratch_file(&key.basename)?;
        infof!(**self.endpoint.log(), "Download {:?}", message.key);
        let metadata = self.endpoint.download(&message.key, file.path()).await?;
        let filename = file
            .into_temp_path()
            .keep()
            .map_err(|e| RpcError::Scratch(Arc::new(e.error)))?;

        self.endpoint.discard_object(&message.key).await;
        self.endpoint.discard_object(request).await;

        Ok(Output { filename, metadata })
    }

    /// Hand back the rest of a batch that arrived with our response.
    async fn release_rest(&self, rest: impl Iterator<Item = Message>) {
        for message in rest {
            if let Err(e) = self.endpoint.release(&message).await {
                debug!(key = %message.key, error = %e, "failed to release message");
            }
        }
    }

    /// Remove the scratch directory, including every call's output file.
    ///
    /// Safe to call any number of times, concurrently; every call returns the
    /// outcome of the single removal.
    pub fn close(&self) -> RpcResult<()> {
        self.endpoint.close()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use s3rpc_core::KeyError;

    use super::*;
    use crate::handler::{HandlerContext, Handlers};
    use crate::test_support::{self, BUCKET, CLIENT_QUEUE, SERVER_QUEUE};

    /// Uppercases the payload.
    fn shout_handlers() -> Handlers {
        let mut handlers = Handlers::new();
        handlers
            .register("shout", |_ctx: HandlerContext, input: Input| async move {
                let content = tokio::fs::read_to_string(&input.filename).await?;
                tokio::fs::write(&input.filename, content.to_uppercase()).await?;
                Ok::<_, anyhow::Error>(Output::new(input.filename))
            })
            .expect("register");
        handlers
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_should_pair_concurrent_calls_on_shared_queue() {
        let broker = test_support::broker();
        let server = test_support::server(&broker, shout_handlers());
        let serving = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.listen_and_serve().await }
        });

        let first = test_support::client(&broker, Duration::from_secs(20));
        let second = test_support::client(&broker, Duration::from_secs(20));
        let dir = tempfile::tempdir().expect("tempdir");
        let a = test_support::payload(dir.path(), "a.txt", "first caller");
        let b = test_support::payload(dir.path(), "b.txt", "second caller");

        let (out_a, out_b) = tokio::join!(first.execute("shout", &a), second.execute("shout", &b));
        let out_a = out_a.expect("first call");
        let out_b = out_b.expect("second call");

        assert_eq!(
            std::fs::read_to_string(&out_a.filename).expect("read a"),
            "FIRST CALLER"
        );
        assert_eq!(
            std::fs::read_to_string(&out_b.filename).expect("read b"),
            "SECOND CALLER"
        );

        server.close().await.expect("close server");
        serving.await.expect("join").expect("serve");
        first.close().expect("close first");
        second.close().expect("close second");
    }

    #[tokio::test]
    async fn test_should_time_out_without_response() {
        let broker = test_support::broker();
        let client = test_support::client(&broker, Duration::from_millis(300));
        let dir = tempfile::tempdir().expect("tempdir");
        let request = test_support::payload(dir.path(), "a.txt", "a");

        let err = client
            .execute("nobody-home", &request)
            .await
            .expect_err("no server is running");
        assert!(
            matches!(&err, RpcError::Timeout { operation, timeout }
                if operation == "nobody-home" && *timeout == Duration::from_millis(300)),
            "{err}"
        );

        // The request was published and is still waiting for a server.
        assert_eq!(broker.keys(BUCKET).len(), 1);
        assert_eq!(broker.message_count(SERVER_QUEUE), Some(1));

        let scratch = client.endpoint.scratch_dir().expect("scratch dir");
        client.close().expect("close");
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn test_should_release_responses_for_other_calls() {
        let broker = test_support::broker();
        let client = test_support::client(&broker, Duration::from_millis(300));
        let foreign = "to_client/shout/00000000-0000-0000-0000-000000000000_x.txt";
        broker
            .send_message(CLIENT_QUEUE, test_support::notification(BUCKET, foreign))
            .expect("send");

        let dir = tempfile::tempdir().expect("tempdir");
        let request = test_support::payload(dir.path(), "a.txt", "a");
        let err = client.execute("shout", &request).await.expect_err("timeout");
        assert!(matches!(err, RpcError::Timeout { .. }));

        // Never deleted; handed back every time it was seen.
        assert_eq!(broker.message_count(CLIENT_QUEUE), Some(1));
        assert_eq!(broker.visible_count(CLIENT_QUEUE), Some(1));
        let counts = broker.receive_counts(CLIENT_QUEUE).expect("queue");
        assert!(counts[0] >= 1, "{counts:?}");
        client.close().expect("close");
    }

    #[tokio::test]
    async fn test_should_fail_on_foreign_bucket() {
        let broker = test_support::broker();
        let client = test_support::client(&broker, Duration::from_secs(5));
        broker
            .send_message(
                CLIENT_QUEUE,
                test_support::notification("other-bucket", "to_client/op/x_a.txt"),
            )
            .expect("send");

        let dir = tempfile::tempdir().expect("tempdir");
        let request = test_support::payload(dir.path(), "a.txt", "a");
        let err = client.execute("op", &request).await.expect_err("mismatch");
        let message = err.to_string();
        assert!(message.contains("\"s3fptest\""), "{message}");
        assert!(message.contains("\"other-bucket\""), "{message}");
        client.close().expect("close");
    }

    #[tokio::test]
    async fn test_should_reject_operation_with_separator_before_upload() {
        let broker = test_support::broker();
        let client = test_support::client(&broker, Duration::from_secs(5));
        let dir = tempfile::tempdir().expect("tempdir");
        let request = test_support::payload(dir.path(), "a.txt", "a");

        assert!(matches!(
            client.execute("a/b", &request).await,
            Err(RpcError::Key(KeyError::OperationContainsSeparator(_)))
        ));
        assert!(broker.keys(BUCKET).is_empty());
        client.close().expect("close");
    }

    #[tokio::test]
    async fn test_should_refuse_calls_after_close() {
        let broker = test_support::broker();
        let client = Arc::new(test_support::client(&broker, Duration::from_secs(5)));

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.close() })
            })
            .collect();
        for closer in closers {
            closer.await.expect("join").expect("close");
        }
        client.close().expect("close again");

        let dir = tempfile::tempdir().expect("tempdir");
        let request = test_support::payload(dir.path(), "a.txt", "a");
        assert!(matches!(
            client.execute("op", &request).await,
            Err(RpcError::Closed)
        ));
    }

    #[test]
    fn test_should_format_options_without_log_sink() {
        let sink: SharedLogSink = Arc::new(|_: fmt::Arguments<'_>| {});
        let options = ClientOptions::builder()
            .queue(CLIENT_QUEUE)
            .log_sink(sink)
            .connection(test_support::connection())
            .build();

        let debug = format!("{options:?}");
        assert!(debug.starts_with("ClientOptions {"), "{debug}");
        assert!(debug.contains(CLIENT_QUEUE), "{debug}");
        assert!(!debug.contains("log_sink"), "{debug}");
        assert!(debug.ends_with(".. }"), "{debug}");
    }

    #[test]
    fn test_should_require_queue() {
        let broker = test_support::broker();
        let options = ClientOptions::builder()
            .queue("")
            .connection(test_support::connection())
            .build();
        assert!(matches!(
            Client::with_transport(options, Transport::in_memory(&broker)),
            Err(RpcError::Config(ConfigError::MissingField("queue")))
        ));
    }
}
