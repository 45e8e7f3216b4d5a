//! Cancellation utilities
//!
//! Provides first-class cancellation handles for chunk streams, and
//! [`CallSlot`], which keeps at most one call in flight per caller.

use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::streaming::ChunkStream;

/// A handle that can be used to request cancellation.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request cancellation. Streams observing this handle stop at their next
    /// suspension point and drop the underlying HTTP connection.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A future that resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Make a chunk stream cancellable and return its cancel handle.
pub fn make_cancellable_stream(stream: ChunkStream) -> (ChunkStream, CancelHandle) {
    let handle = CancelHandle::new();
    (with_cancel(stream, handle.clone()), handle)
}

/// Stop `stream` as soon as `handle` is cancelled.
///
/// The inner stream is dropped on cancellation, which releases whatever
/// connection it holds. No further items are yielded.
pub fn with_cancel(stream: ChunkStream, handle: CancelHandle) -> ChunkStream {
    let mut inner = stream;
    let s = async_stream::stream! {
        use futures::StreamExt;
        loop {
            let next = tokio::select! {
                biased;
                _ = handle.cancelled() => {
                    tracing::debug!(target: "hkgai_llm::stream", "stream cancelled by caller");
                    None
                }
                item = inner.next() => item,
            };
            let Some(item) = next else { break };
            yield item;
        }
        drop(inner);
    };
    Box::pin(s)
}

/// Create a standalone cancel handle that can be shared across tasks.
pub fn new_cancel_handle() -> CancelHandle {
    CancelHandle::new()
}

/// Holds the cancel handle of a caller's current call.
///
/// Starting a call through [`CallSlot::begin`] silently supersedes the
/// previous one: its handle is cancelled before the new handle is returned.
#[derive(Clone, Debug, Default)]
pub struct CallSlot {
    current: Arc<Mutex<Option<CancelHandle>>>,
}

impl CallSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new call, cancelling the one in flight.
    pub fn begin(&self) -> CancelHandle {
        let handle = CancelHandle::new();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle.clone());
        if let Some(previous) = previous {
            if !previous.is_cancelled() {
                tracing::debug!(target: "hkgai_llm::cancel", "superseding in-flight call");
            }
            previous.cancel();
        }
        handle
    }

    /// Cancel the current call, if any.
    pub fn cancel_current(&self) {
        if let Some(handle) = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.cancel();
        }
    }

    /// Whether a call registered here has not been cancelled.
    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_cancelled())
    }
}
