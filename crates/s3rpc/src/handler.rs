//! Operation handlers and the handler table.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use s3rpc_core::{ConfigError, Input, Output, validate_operation};
use tokio::sync::watch;

/// Per-invocation context handed to a [`Handler`].
#[derive(Debug, Clone)]
pub struct HandlerContext {
    operation: String,
    key: String,
    scratch_dir: PathBuf,
    shutdown: watch::Receiver<bool>,
}

impl HandlerContext {
    /// Build a context by hand, e.g. to exercise a handler without a server.
    #[must_use]
    pub fn new(
        operation: impl Into<String>,
        key: impl Into<String>,
        scratch_dir: impl Into<PathBuf>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            operation: operation.into(),
            key: key.into(),
            scratch_dir: scratch_dir.into(),
            shutdown,
        }
    }

    /// Name of the operation being served.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Object key of the request.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The server's scratch directory. Files written here are removed when
    /// the server is closed.
    #[must_use]
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Whether the server has been asked to stop, by
    /// [`Server::close`](crate::Server::close) or by the loop's shutdown
    /// signal.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolve once the server has been asked to stop.
    pub async fn shutdown(&mut self) {
        // A dropped sender means the server is gone, which is a shutdown too.
        let _ = self.shutdown.wait_for(|closed| *closed).await;
    }
}

/// Serves one operation: turns a staged request payload into a response.
///
/// Closures `Fn(HandlerContext, Input) -> impl Future<Output = anyhow::Result<Output>>`
/// implement this trait.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request. An error aborts the server loop.
    async fn handle(&self, ctx: HandlerContext, input: Input) -> anyhow::Result<Output>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(HandlerContext, Input) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Output>> + Send + 'static,
{
    async fn handle(&self, ctx: HandlerContext, input: Input) -> anyhow::Result<Output> {
        self(ctx, input).await
    }
}

/// Operation name to handler. Fixed once a server is built.
#[derive(Clone, Default)]
pub struct Handlers {
    table: HashMap<String, Arc<dyn Handler>>,
}

impl Handlers {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `operation`, replacing any previous one.
    ///
    /// The name becomes a key segment, so it must be non-empty and free of
    /// `/`.
    pub fn register<H>(
        &mut self,
        operation: impl Into<String>,
        handler: H,
    ) -> Result<&mut Self, ConfigError>
    where
        H: Handler + 'static,
    {
        let operation = operation.into();
        validate_operation(&operation)
            .map_err(|e| ConfigError::InvalidOperation(operation.clone(), e))?;
        self.table.insert(operation, Arc::new(handler));
        Ok(self)
    }

    /// Handler registered for `operation`.
    #[must_use]
    pub fn get(&self, operation: &str) -> Option<&Arc<dyn Handler>> {
        self.table.get(operation)
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        let mut ops: Vec<&str> = self.table.keys().map(String::as_str).collect();
        ops.sort_unstable();
        ops
    }

    /// Number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether no operation is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("operations", &self.operations())
            .finish()
    }
}
