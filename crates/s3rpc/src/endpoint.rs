//! Primitives shared by the server loop and client calls.
//!
//! An [`Endpoint`] is one side of the protocol: a bucket, the queue it
//! consumes, the transport, and a private scratch directory. It owns no
//! protocol decisions; server and client combine these steps in their own
//! order.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use s3rpc_core::{
    Message, Metadata, ProtocolError, ReceiveSettings, Role, RpcError, RpcResult,
    SharedLogSink, infof, parse_notification,
};
use s3rpc_transport::Transport;
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, trace};

/// Lifecycle of the scratch directory.
#[derive(Debug)]
enum ScratchState {
    Open(TempDir),
    /// Holds the outcome of the one removal so repeated closes report it.
    Closed(Result<(), Arc<io::Error>>),
}

pub(crate) struct Endpoint {
    role: Role,
    bucket: String,
    queue: String,
    transport: Transport,
    receive: ReceiveSettings,
    log: SharedLogSink,
    scratch: Mutex<ScratchState>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("role", &self.role)
            .field("bucket", &self.bucket)
            .field("queue", &self.queue)
            .field("receive", &self.receive)
            .field("scratch", &self.scratch)
            .finish_non_exhaustive()
    }
}

impl Endpoint {
    pub(crate) fn new(
        role: Role,
        bucket: String,
        queue: String,
        transport: Transport,
        receive: ReceiveSettings,
        log: SharedLogSink,
    ) -> RpcResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("s3rpc_{role}"))
            .tempdir()
            .map_err(|e| RpcError::Scratch(Arc::new(e)))?;
        debug!(%role, dir = %dir.path().display(), "created scratch directory");

        Ok(Self {
            role,
            bucket,
            queue,
            transport,
            receive,
            log,
            scratch: Mutex::new(ScratchState::Open(dir)),
        })
    }

    pub(crate) fn log(&self) -> &SharedLogSink {
        &self.log
    }

    pub(crate) fn queue(&self) -> &str {
        &self.queue
    }

    /// Path of the scratch directory, or [`RpcError::Closed`].
    pub(crate) fn scratch_dir(&self) -> RpcResult<PathBuf> {
        match &*self.scratch.lock() {
            ScratchState::Open(dir) => Ok(dir.path().to_owned()),
            ScratchState::Closed(_) => Err(RpcError::Closed),
        }
    }

    /// A fresh, uniquely named file in the scratch directory ending in
    /// `_<basename>`. Removed when dropped unless kept.
    pub(crate) fn scratch_file(&self, basename: &str) -> RpcResult<NamedTempFile> {
        let dir = self.scratch_dir()?;
        tempfile::Builder::new()
            .suffix(&format!("_{basename}"))
            .tempfile_in(dir)
            .map_err(|e| RpcError::Scratch(Arc::new(e)))
    }

    /// Receive one batch and decode it. Bodies without records are dropped.
    pub(crate) async fn receive(&self) -> RpcResult<Vec<Message>> {
        let raw = self
            .transport
            .queue
            .receive(&self.queue, &self.receive)
            .await?;

        let mut messages = Vec::with_capacity(raw.len());
        for m in raw {
            match parse_notification(&m.body)? {
                Some(object) => messages.push(Message {
                    bucket: object.bucket,
                    key: object.key,
                    receipt_handle: m.receipt_handle,
                }),
                None => trace!(queue = %self.queue, "ignoring notification without records"),
            }
        }
        Ok(messages)
    }

    pub(crate) fn ensure_bucket(&self, message: &Message) -> Result<(), ProtocolError> {
        if message.bucket == self.bucket {
            Ok(())
        } else {
            Err(ProtocolError::BucketMismatch {
                expected: self.bucket.clone(),
                actual: message.bucket.clone(),
            })
        }
    }

    /// Make the message immediately receivable again.
    pub(crate) async fn release(&self, message: &Message) -> RpcResult<()> {
        trace!(queue = %self.queue, key = %message.key, "releasing message");
        self.transport
            .queue
            .reset_lease(&self.queue, &message.receipt_handle, Duration::ZERO)
            .await?;
        Ok(())
    }

    /// Remove the message from the queue for good.
    pub(crate) async fn commit(&self, message: &Message) -> RpcResult<()> {
        trace!(queue = %self.queue, key = %message.key, "deleting message");
        self.transport
            .queue
            .delete_message(&self.queue, &message.receipt_handle)
            .await?;
        Ok(())
    }

    pub(crate) async fn download(&self, key: &str, dest: &Path) -> RpcResult<Metadata> {
        infof!(*self.log, "Downloading {}/{}", self.bucket, key);
        let metadata = self.transport.store.download(&self.bucket, key, dest).await?;
        Ok(metadata)
    }

    pub(crate) async fn upload(
        &self,
        source: &Path,
        key: &str,
        metadata: &Metadata,
    ) -> RpcResult<()> {
        infof!(
            *self.log,
            "Uploading {} to {}/{}",
            source.display(),
            self.bucket,
            key
        );
        self.transport
            .store
            .upload(&self.bucket, key, source, metadata)
            .await?;
        Ok(())
    }

    /// Delete an object, logging instead of failing.
    pub(crate) async fn discard_object(&self, key: &str) {
        if let Err(e) = self.transport.store.delete(&self.bucket, key).await {
            debug!(bucket = %self.bucket, key, error = %e, "failed to delete object");
        }
    }

    /// Remove the scratch directory. Only the first call does any work;
    /// every call returns its outcome.
    pub(crate) fn close(&self) -> RpcResult<()> {
        let mut state = self.scratch.lock();
        let outcome = match std::mem::replace(&mut *state, ScratchState::Closed(Ok(()))) {
            ScratchState::Open(dir) => {
                let path = dir.path().to_owned();
                let outcome = dir.close().map_err(Arc::new);
                debug!(
                    role = %self.role,
                    dir = %path.display(),
                    ok = outcome.is_ok(),
                    "removed scratch directory"
                );
                outcome
            }
            ScratchState::Closed(outcome) => outcome,
        };
        *state = ScratchState::Closed(outcome.clone());
        outcome.map_err(RpcError::Scratch)
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.scratch.lock(), ScratchState::Closed(_))
    }
}
