//! Core types for s3rpc: the object key scheme, the notification schema,
//! configuration and the error taxonomy.
//!
//! s3rpc runs request/response calls between processes that share nothing
//! but a bucket and two notification queues. Requests are uploaded under
//! `to_server/...`, responses under `to_client/...`; the bucket publishes an
//! event notification for each upload and each side polls its queue for the
//! keys it cares about. This crate holds the pieces both sides agree on.

mod config;
mod error;
mod keys;
mod log;
pub mod notification;
mod types;

pub use config::{
    ConnectionConfig, DEFAULT_LEASE, DEFAULT_MAX_MESSAGES, DEFAULT_REGION, DEFAULT_WAIT,
    ReceiveSettings, Role,
};
pub use error::{
    BoxError, ConfigError, KeyError, ProtocolError, RpcError, RpcResult, TransportError,
};
pub use keys::{Direction, ObjectKey, SEPARATOR, validate_operation};
pub use log::{LogSink, SharedLogSink, TracingSink};
pub use notification::{ObjectRef, S3EventNotification, parse_notification};
pub use types::{CorrelationId, Input, Message, Metadata, Output};
