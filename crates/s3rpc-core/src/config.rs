//! Connection and polling configuration.
//!
//! Values can be built in code with the typed builders or loaded from
//! environment variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `S3RPC_REGION` | `eu-north-1` |
//! | `S3RPC_BUCKET` | *(required)* |
//! | `S3RPC_ENDPOINT_URL` | *(unset, use AWS)* |
//! | `S3RPC_{CLIENT,SERVER}_ACCESS_KEY_ID` | *(required)* |
//! | `S3RPC_{CLIENT,SERVER}_SECRET_ACCESS_KEY` | *(required)* |
//! | `S3RPC_{CLIENT,SERVER}_QUEUE` | *(required)* |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "eu-north-1";

/// Messages fetched per receive call.
pub const DEFAULT_MAX_MESSAGES: u8 = 5;

/// How long a received message stays invisible to other consumers.
///
/// Long enough to decide whether a message is ours and delete it.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(7);

/// Long-poll wait for a receive call.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(20);

/// Which end of the protocol a process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Publishes requests, consumes responses.
    Client,
    /// Consumes requests, publishes responses.
    Server,
}

impl Role {
    /// Lower-case name used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }

    fn env_prefix(self) -> &'static str {
        match self {
            Self::Client => "S3RPC_CLIENT",
            Self::Server => "S3RPC_SERVER",
        }
    }

    /// Queue URL for this role from `S3RPC_{ROLE}_QUEUE`, or empty.
    #[must_use]
    pub fn queue_from_env(self) -> String {
        std::env::var(format!("{}_QUEUE", self.env_prefix())).unwrap_or_default()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object store and queue service connection parameters.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// AWS region.
    #[builder(default = String::from(DEFAULT_REGION), setter(into))]
    #[serde(default)]
    pub region: String,

    /// Bucket holding request and response objects.
    #[builder(setter(into))]
    pub bucket: String,

    /// Access key id.
    #[builder(setter(into))]
    pub access_key_id: String,

    /// Secret access key.
    #[builder(setter(into))]
    pub secret_access_key: String,

    /// Custom endpoint for AWS-compatible services; path-style addressing is
    /// used when set.
    #[builder(default, setter(strip_option, into))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_url: Option<String>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

impl ConnectionConfig {
    /// Load the connection for `role` from environment variables.
    ///
    /// Missing variables are left empty; call [`validate`](Self::validate)
    /// to catch them.
    #[must_use]
    pub fn from_env(role: Role) -> Self {
        let var = |name: &str| std::env::var(name).unwrap_or_default();
        let prefix = role.env_prefix();

        let region = var("S3RPC_REGION");
        Self {
            region: if region.is_empty() {
                DEFAULT_REGION.to_owned()
            } else {
                region
            },
            bucket: var("S3RPC_BUCKET"),
            access_key_id: var(&format!("{prefix}_ACCESS_KEY_ID")),
            secret_access_key: var(&format!("{prefix}_SECRET_ACCESS_KEY")),
            endpoint_url: std::env::var("S3RPC_ENDPOINT_URL")
                .ok()
                .filter(|v| !v.is_empty()),
        }
    }

    /// Fill defaults and check required fields.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.region.is_empty() {
            DEFAULT_REGION.clone_into(&mut self.region);
        }
        if self.bucket.is_empty() {
            return Err(ConfigError::MissingField("bucket"));
        }
        if self.access_key_id.is_empty() {
            return Err(ConfigError::MissingField("access key id"));
        }
        if self.secret_access_key.is_empty() {
            return Err(ConfigError::MissingField("secret access key"));
        }
        Ok(())
    }
}

/// Receive call parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveSettings {
    /// Upper bound of messages per receive (1-10 on SQS).
    #[builder(default = DEFAULT_MAX_MESSAGES)]
    pub max_messages: u8,

    /// Lease granted to received messages.
    #[builder(default = DEFAULT_LEASE)]
    pub lease: Duration,

    /// Long-poll wait when the queue is empty.
    #[builder(default = DEFAULT_WAIT)]
    pub wait: Duration,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_messages: DEFAULT_MAX_MESSAGES,
            lease: DEFAULT_LEASE,
            wait: DEFAULT_WAIT,
        }
    }
}
