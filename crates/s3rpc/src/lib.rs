//! Request/response calls between processes that share only a bucket and two
//! notification queues.
//!
//! A [`Client`] uploads the request payload under
//! `to_server/<operation>/<id>_<file>`; the bucket notifies the server queue,
//! a [`Server`] downloads the payload, runs the registered [`Handler`] and
//! uploads the result under `to_client/<operation>/<id>_<file>`; the bucket
//! notifies the client queue and the client picks out the key carrying its
//! id.
//!
//! # Example
//!
//! ```no_run
//! use s3rpc::{Client, ClientOptions, ConnectionConfig, Role};
//!
//! # async fn run() -> Result<(), s3rpc::RpcError> {
//! let client = Client::new(
//!     ClientOptions::builder()
//!         .queue(Role::Client.queue_from_env())
//!         .connection(ConnectionConfig::from_env(Role::Client))
//!         .build(),
//! )?;
//! let output = client.execute("resize", "photo.jpg").await?;
//! println!("{}", output.filename.display());
//! client.close()?;
//! # Ok(())
//! # }
//! ```

mod client;
mod endpoint;
mod handler;
mod server;
#[cfg(test)]
mod test_support;

pub use client::{Client, ClientOptions, DEFAULT_TIMEOUT};
pub use handler::{Handler, HandlerContext, Handlers};
pub use server::{DEFAULT_POLL_INTERVAL, Server, ServerOptions};

pub use s3rpc_core::{
    ConfigError, ConnectionConfig, CorrelationId, Input, KeyError, LogSink, Metadata, Output,
    ProtocolError, ReceiveSettings, Role, RpcError, RpcResult, SharedLogSink, TracingSink,
    TransportError, infof,
};
pub use s3rpc_transport::{InMemoryBroker, NotificationQueue, ObjectStore, Transport};
