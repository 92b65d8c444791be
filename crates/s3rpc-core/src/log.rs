//! Pluggable progress log.
//!
//! Client and server report protocol progress ("Uploading ...", "Got message
//! with key ...") through a [`LogSink`]. The default, [`TracingSink`], emits
//! them as `tracing` info events tagged with the role. Any
//! `Fn(fmt::Arguments<'_>)` closure is also a sink.

use std::fmt;
use std::sync::Arc;

use crate::config::Role;

/// Receives formatted progress messages.
pub trait LogSink: Send + Sync {
    /// Record one message.
    fn log(&self, args: fmt::Arguments<'_>);
}

impl<F> LogSink for F
where
    F: Fn(fmt::Arguments<'_>) + Send + Sync,
{
    fn log(&self, args: fmt::Arguments<'_>) {
        self(args);
    }
}

/// Sink forwarding to `tracing` at info level.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    role: Role,
}

impl TracingSink {
    /// Sink tagging events with `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self { role }
    }
}

impl LogSink for TracingSink {
    fn log(&self, args: fmt::Arguments<'_>) {
        tracing::info!(role = self.role.as_str(), "{args}");
    }
}

/// Shared handle to a sink.
pub type SharedLogSink = Arc<dyn LogSink>;

/// Log through a [`LogSink`] with `format!` syntax.
///
/// ```
/// use s3rpc_core::{LogSink, infof};
///
/// let lines = std::sync::Mutex::new(Vec::new());
/// let sink = |args: std::fmt::Arguments<'_>| lines.lock().unwrap().push(args.to_string());
/// infof!(sink, "Checking queue {:?}", "q1");
/// assert_eq!(lines.lock().unwrap()[0], "Checking queue \"q1\"");
/// ```
#[macro_export]
macro_rules! infof {
    ($sink:expr, $($arg:tt)+) => {
        $crate::LogSink::log(&$sink, ::std::format_args!($($arg)+))
    };
}
