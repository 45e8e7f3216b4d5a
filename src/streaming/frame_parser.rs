//! Stream Frame Parser
//!
//! Turns an incremental byte source into [`Frame`]s:
//!
//! 1. bytes are appended to a line buffer and split on `\n`; the trailing
//!    partial line stays buffered until the next block arrives,
//! 2. blank lines and comments are skipped, `event:` lines name the frames
//!    that follow, `data:` payloads are parsed as JSON,
//! 3. the `[DONE]` sentinel ends the stream cleanly,
//! 4. a malformed payload is logged and skipped,
//! 5. a partial line left when the source ends is discarded (backends end
//!    their streams on a line boundary).
//!
//! Splitting happens on raw bytes before UTF-8 decoding. `\n` never occurs
//! inside a multi-byte sequence, so a block boundary falling in the middle of
//! a line, a JSON value or a character has no effect on the frames produced.

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::time::Instant;

use crate::error::LlmError;
use crate::streaming::ByteStream;

/// Payload ending a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

const LOG_LINE_LIMIT: usize = 200;

/// One parsed `data:` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Name from the preceding `event:` line, if any.
    pub event: Option<String>,
    pub data: Value,
}

/// Lifecycle of a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Init,
    Reading,
    Done,
    TimedOut,
    Error,
}

impl ParserState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::TimedOut | Self::Error)
    }
}

enum LineOutcome {
    Frame(Frame),
    Done,
    Skip,
}

/// Incremental line decoder, fed one byte block at a time.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    pending_event: Option<String>,
    state: ParserState,
    frames_parsed: usize,
    malformed_lines: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            buffer: Vec::new(),
            pending_event: None,
            state: ParserState::Init,
            frames_parsed: 0,
            malformed_lines: 0,
        }
    }

    pub const fn state(&self) -> ParserState {
        self.state
    }

    pub const fn frames_parsed(&self) -> usize {
        self.frames_parsed
    }

    pub const fn malformed_lines(&self) -> usize {
        self.malformed_lines
    }

    /// Feed one block and return the frames completed by it.
    ///
    /// Blocks pushed after the sentinel or a terminal state are ignored.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state = ParserState::Reading;
        // The retained partial line has no `\n`; only new bytes need scanning.
        let mut scan_from = self.buffer.len();
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + pos;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            scan_from = start;

            match self.process_line(&line) {
                LineOutcome::Frame(frame) => frames.push(frame),
                LineOutcome::Skip => {}
                LineOutcome::Done => {
                    self.buffer.clear();
                    self.state = ParserState::Done;
                    return frames;
                }
            }
        }
        self.buffer.drain(..start);
        frames
    }

    /// The source ended; drop any unterminated line.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            tracing::debug!(
                target: "hkgai_llm::stream",
                bytes = self.buffer.len(),
                "discarding unterminated trailing line"
            );
            self.buffer.clear();
        }
        if !self.state.is_terminal() {
            self.state = ParserState::Done;
        }
    }

    pub fn mark_timed_out(&mut self) {
        self.buffer.clear();
        self.state = ParserState::TimedOut;
    }

    pub fn mark_error(&mut self) {
        self.buffer.clear();
        self.state = ParserState::Error;
    }

    fn process_line(&mut self, raw: &str) -> LineOutcome {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.trim().is_empty() {
            self.pending_event = None;
            return LineOutcome::Skip;
        }
        if line.starts_with(':') {
            return LineOutcome::Skip;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.pending_event = Some(name.trim().to_string());
            return LineOutcome::Skip;
        }
        let Some(payload) = line.strip_prefix("data:") else {
            tracing::trace!(target: "hkgai_llm::stream", line = %truncate(line), "ignoring non-data line");
            return LineOutcome::Skip;
        };

        let payload = payload.trim();
        if payload.is_empty() {
            return LineOutcome::Skip;
        }
        if payload == DONE_SENTINEL {
            return LineOutcome::Done;
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(data) => {
                self.frames_parsed += 1;
                LineOutcome::Frame(Frame {
                    event: self.pending_event.clone(),
                    data,
                })
            }
            Err(e) => {
                self.malformed_lines += 1;
                tracing::warn!(
                    target: "hkgai_llm::stream",
                    error = %e,
                    payload = %truncate(payload),
                    "skipping malformed stream frame"
                );
                LineOutcome::Skip
            }
        }
    }
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(LOG_LINE_LIMIT) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// Lazily decode `bytes` into frames until the sentinel, the end of the
/// source, or `deadline`.
///
/// Terminal conditions are reported as a final `Err` item:
/// - `TimeoutError` when the deadline passes first,
/// - `StreamError` when the source fails,
/// - `ParseError` when the source ended without a single parsable frame but
///   with malformed ones.
///
/// The byte source is dropped as soon as the stream stops, releasing the
/// underlying connection whichever way it ends.
pub fn frame_stream(
    mut bytes: ByteStream,
    deadline: Instant,
) -> impl Stream<Item = Result<Frame, LlmError>> + Send {
    async_stream::stream! {
        let mut decoder = FrameDecoder::new();

        loop {
            // An always-ready source must not starve the deadline.
            let polled = if Instant::now() >= deadline {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep_until(deadline) => None,
                    item = bytes.next() => Some(item),
                }
            };
            let Some(next) = polled else {
                decoder.mark_timed_out();
                yield Err(LlmError::TimeoutError(
                    "stream did not finish within its time budget".to_string(),
                ));
                return;
            };

            match next {
                Some(Ok(block)) => {
                    let frames = decoder.push(&block);
                    if decoder.state() != ParserState::Done && frames.is_empty() {
                        tokio::task::yield_now().await;
                    }
                    for frame in frames {
                        yield Ok(frame);
                    }
                    if decoder.state() == ParserState::Done {
                        return;
                    }
                }
                Some(Err(e)) => {
                    decoder.mark_error();
                    yield Err(LlmError::StreamError(e.to_string()));
                    return;
                }
                None => {
                    decoder.finish();
                    break;
                }
            }
        }

        if decoder.frames_parsed() == 0 && decoder.malformed_lines() > 0 {
            yield Err(LlmError::ParseError(format!(
                "none of {} stream frames could be parsed",
                decoder.malformed_lines()
            )));
        }
    }
}
