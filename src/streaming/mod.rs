//! Streaming Module
//!
//! Byte-level and chunk-level stream types plus the frame parser that sits
//! between them.

pub mod frame_parser;

use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

use crate::error::LlmError;
use crate::types::StreamChunk;
use crate::utils::cancel::CancelHandle;

pub use frame_parser::{DONE_SENTINEL, Frame, FrameDecoder, ParserState, frame_stream};

/// Raw response body as delivered by a transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, LlmError>> + Send>>;

/// Normalized answer increments.
///
/// Items are plain chunks: transport, parse and timeout failures have already
/// been folded into fallback text by the adapter.
pub type ChunkStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Chunk stream with first-class cancellation handle
///
/// Cancelling stops delivery, drops the underlying connection and emits no
/// fallback chunk.
pub struct ChunkStreamHandle {
    pub stream: ChunkStream,
    pub cancel: CancelHandle,
}

impl ChunkStreamHandle {
    pub fn into_parts(self) -> (ChunkStream, CancelHandle) {
        (self.stream, self.cancel)
    }
}

impl std::fmt::Debug for ChunkStreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkStreamHandle")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}
