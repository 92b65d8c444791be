//! The server loop.
//!
//! ```text
//! loop:
//!   closed?            -> stop
//!   receive batch      (raced against close and the shutdown signal)
//!   for each message:
//!     foreign bucket   -> error
//!     unknown op       -> release, next
//!     known op         -> delete message, download, handle, upload response
//!   sleep poll interval (raced against close and the shutdown signal)
//! ```
//!
//! Nothing between receiving a batch and finishing its last message is
//! interrupted: a shutdown signal or close arriving mid-batch only reaches
//! the running handler through its context. The first error of any kind ends
//! the loop.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use s3rpc_core::{
    ConfigError, ConnectionConfig, Direction, Input, Message, ObjectKey, ProtocolError,
    ReceiveSettings, Role, RpcError, RpcResult, SharedLogSink, TracingSink, infof,
};
use s3rpc_transport::Transport;
use tokio::sync::watch;
use tracing::{debug, info};
use typed_builder::TypedBuilder;

use crate::endpoint::Endpoint;
use crate::handler::{HandlerContext, Handlers};

/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Server construction options.
#[derive(TypedBuilder)]
pub struct ServerOptions {
    /// Operations this server answers.
    #[builder(default)]
    pub handlers: Handlers,

    /// Queue receiving request notifications (a queue URL on SQS).
    #[builder(setter(into))]
    pub queue: String,

    /// Pause after each processed batch.
    #[builder(default = DEFAULT_POLL_INTERVAL)]
    pub poll_interval: Duration,

    /// Progress log; defaults to `tracing` tagged `server`.
    #[builder(default, setter(strip_option))]
    pub log_sink: Option<SharedLogSink>,

    /// Bucket, region and credentials.
    pub connection: ConnectionConfig,

    /// Receive batch size, lease and wait.
    #[builder(default)]
    pub receive: ReceiveSettings,
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("handlers", &self.handlers)
            .field("queue", &self.queue)
            .field("poll_interval", &self.poll_interval)
            .field("connection", &self.connection)
            .field("receive", &self.receive)
            .finish_non_exhaustive()
    }
}

/// Polls the request queue and answers requests with registered handlers.
#[derive(Debug)]
pub struct Server {
    endpoint: Endpoint,
    handlers: Handlers,
    poll_interval: Duration,
    closed: watch::Sender<bool>,
    in_flight: watch::Sender<usize>,
}

/// Counts one handler invocation until dropped.
struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

impl Server {
    /// Build a server talking to S3 and SQS.
    pub fn new(mut options: ServerOptions) -> RpcResult<Self> {
        options.connection.validate()?;
        let transport = Transport::aws(&options.connection);
        Self::with_transport(options, transport)
    }

    /// Build a server on an explicit transport.
    pub fn with_transport(options: ServerOptions, transport: Transport) -> RpcResult<Self> {
        let ServerOptions {
            handlers,
            queue,
            poll_interval,
            log_sink,
            mut connection,
            receive,
        } = options;

        connection.validate()?;
        if queue.is_empty() {
            return Err(ConfigError::MissingField("queue").into());
        }

        let log = log_sink.unwrap_or_else(|| Arc::new(TracingSink::new(Role::Server)));
        let endpoint = Endpoint::new(
            Role::Server,
            connection.bucket,
            queue,
            transport,
            receive,
            log,
        )?;
        let (closed, _) = watch::channel(false);
        let (in_flight, _) = watch::channel(0);

        debug!(operations = ?handlers.operations(), "server created");
        Ok(Self {
            endpoint,
            handlers,
            poll_interval,
            closed,
            in_flight,
        })
    }

    /// Serve until [`close`](Self::close) is called or an error occurs.
    pub async fn listen_and_serve(&self) -> RpcResult<()> {
        self.listen_and_serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `signal` resolves, [`close`](Self::close) is called, or an
    /// error occurs.
    ///
    /// A signal or close arriving mid-batch is passed on to the running
    /// handler through [`HandlerContext::shutdown`]; the batch is finished
    /// before the loop returns.
    pub async fn listen_and_serve_with_shutdown<F>(&self, signal: F) -> RpcResult<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        let mut closed = self.closed.subscribe();
        let (stopping, _) = watch::channel(false);
        let log = self.endpoint.log();

        loop {
            if *closed.borrow() {
                infof!(**log, "Closed");
                return Ok(());
            }

            infof!(
                **log,
                "Checking queue {:?} for new messages",
                self.endpoint.queue()
            );
            let messages = tokio::select! {
                _ = closed.changed() => continue,
                () = &mut signal => {
                    info!("shutdown signal received, leaving server loop");
                    return Ok(());
                }
                received = self.endpoint.receive() => received?,
            };

            let mut signalled = false;
            let batch = self.dispatch_batch(&messages, &stopping);
            tokio::pin!(batch);
            loop {
                tokio::select! {
                    result = &mut batch => {
                        result?;
                        break;
                    }
                    () = &mut signal, if !signalled => {
                        info!("shutdown signal received, finishing current batch");
                        signalled = true;
                        stopping.send_replace(true);
                    }
                    _ = closed.changed(), if !*stopping.borrow() => {
                        stopping.send_replace(true);
                    }
                }
            }
            if signalled {
                info!("leaving server loop");
                return Ok(());
            }
            if *closed.borrow() {
                continue;
            }

            tokio::select! {
                _ = closed.changed() => {}
                () = &mut signal => {
                    info!("shutdown signal received, leaving server loop");
                    return Ok(());
                }
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Receive one batch and process it without sleeping. Returns how many
    /// messages were dispatched to a handler.
    pub async fn serve_batch(&self) -> RpcResult<usize> {
        if self.endpoint.is_closed() {
            return Err(RpcError::Closed);
        }
        let mut handled = 0;
        for message in &self.endpoint.receive().await? {
            if self.dispatch(message, self.closed.subscribe()).await? {
                handled += 1;
            }
        }
        Ok(handled)
    }

    async fn dispatch_batch(
        &self,
        messages: &[Message],
        stopping: &watch::Sender<bool>,
    ) -> RpcResult<()> {
        for message in messages {
            self.dispatch(message, stopping.subscribe()).await?;
        }
        Ok(())
    }

    /// Process one message. Returns whether a handler ran.
    async fn dispatch(
        &self,
        message: &Message,
        shutdown: watch::Receiver<bool>,
    ) -> RpcResult<bool> {
        self.endpoint.ensure_bucket(message)?;
        infof!(**self.endpoint.log(), "Got message with key {:?}", message.key);

        let key = ObjectKey::parse(&message.key).map_err(ProtocolError::InvalidKey)?;
        if key.direction != Direction::ToServer {
            return Err(ProtocolError::UnexpectedDirection {
                key: message.key.clone(),
                expected: Role::Server.as_str(),
            }
            .into());
        }

        let Some(handler) = self.handlers.get(&key.operation) else {
            debug!(operation = %key.operation, "no handler registered, releasing");
            self.endpoint.release(message).await?;
            return Ok(false);
        };

        // Registered before the closed flag is read, so `close` either waits
        // for this call or this call sees the flag.
        let _in_flight = InFlight::enter(&self.in_flight);
        if *self.closed.borrow() {
            debug!(key = %message.key, "server closed, releasing");
            self.endpoint.release(message).await?;
            return Ok(false);
        }

        self.endpoint.commit(message).await?;

        let request = self.endpoint.scratch_file(&key.basename)?;
        let metadata = self.endpoint.download(&message.key, request.path()).await?;

        let ctx = HandlerContext::new(
            key.operation.clone(),
            message.key.clone(),
            self.endpoint.scratch_dir()?,
            shutdown,
        );
        let input = Input {
            filename: request.path().to_owned(),
            metadata,
        };
        let output = handler
            .handle(ctx, input)
            .await
            .map_err(|source| RpcError::Handler {
                operation: key.operation.clone(),
                source,
            })?;

        let response = key.response().to_string();
        self.endpoint
            .upload(&output.filename, &response, &output.metadata)
            .await?;

        if let Err(e) = request.close() {
            debug!(error = %e, "failed to remove request scratch file");
        }
        Ok(true)
    }

    /// Stop the loop, wait for running handlers to finish, then remove the
    /// scratch directory.
    ///
    /// Running handlers see [`HandlerContext::shutdown`] resolve. Safe to
    /// call any number of times, concurrently; every call returns the
    /// outcome of the single removal.
    pub async fn close(&self) -> RpcResult<()> {
        self.closed.send_replace(true);
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives in `self`, so this only returns once idle.
        let _ = in_flight.wait_for(|n| *n == 0).await;
        self.endpoint.close()
    }
}
