//! Event frame decoder
//!
//! Turns an arbitrarily chunked byte stream into an ordered sequence of
//! typed `StreamEvent`s. Frames are newline-terminated lines carrying a
//! `data:` marker followed by `{"kind": ..., "data": ...}`. A frame may be
//! split across chunks and a chunk may carry any number of frames; the
//! unterminated tail is carried over to the next chunk.
//!
//! Malformed frames are dropped with a warning and never abort decoding.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use storyui_protocol::{EventKind, StreamEvent};

/// Prefix marking a line as an event frame
pub const FRAME_MARKER: &str = "data:";

const PREVIEW_CHARS: usize = 200;

/// Why a single frame was dropped
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("malformed frame payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event kind `{0}`")]
    UnknownKind(String),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(alias = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// Parse one complete line.
///
/// Returns `Ok(None)` for lines that are not frames (blank lines, SSE
/// comments, `event:`/`id:` fields).
pub fn parse_frame(line: &str) -> Result<Option<StreamEvent>, FrameError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(payload) = line.strip_prefix(FRAME_MARKER) else {
        return Ok(None);
    };
    let payload = payload.trim_start();
    if payload.is_empty() {
        return Ok(None);
    }

    let raw: RawFrame = serde_json::from_str(payload)?;
    let kind: EventKind = raw.kind.parse().map_err(FrameError::UnknownKind)?;
    Ok(Some(StreamEvent::from_parts(kind, raw.data)?))
}

/// Incremental decoder state: one growable buffer holding the unterminated
/// tail of the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// Bytes of `buffer` already searched for a newline
    scanned: usize,
    decoded: u64,
    dropped: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == b'\n')
        {
            let line = self.buffer.split_to(self.scanned + offset + 1).freeze();
            self.scanned = 0;
            self.decode_line(&line, &mut events);
        }
        self.scanned = self.buffer.len();
        events
    }

    /// Flush the trailing unterminated line at end-of-stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = self.buffer.split().freeze();
            self.scanned = 0;
            self.decode_line(&line, &mut events);
        }
        events
    }

    /// Number of events produced so far
    pub fn decoded(&self) -> u64 {
        self.decoded
    }

    /// Number of frames dropped as malformed
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn decode_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        let parsed = std::str::from_utf8(line)
            .map_err(FrameError::from)
            .and_then(parse_frame);

        match parsed {
            Ok(Some(event)) => {
                self.decoded += 1;
                events.push(event);
            }
            Ok(None) => {}
            Err(error) => {
                self.dropped += 1;
                let preview: String = String::from_utf8_lossy(line)
                    .trim_end()
                    .chars()
                    .take(PREVIEW_CHARS)
                    .collect();
                warn!(
                    component = "decoder",
                    event = "decoder.frame_dropped",
                    error = %error,
                    line_preview = %preview,
                    "Dropping malformed stream frame"
                );
            }
        }
    }
}

/// Adapt a byte stream into a stream of decoded events.
///
/// Transport errors are passed through in order; the sequence ends after the
/// first error or at end-of-stream (after flushing any trailing frame).
pub fn decode_stream<S, E>(stream: S) -> impl Stream<Item = Result<StreamEvent, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    futures::stream::unfold(
        (stream, FrameDecoder::new(), VecDeque::new(), false),
        |(mut stream, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match stream.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(error)) => {
                        done = true;
                        return Some((Err(error), (stream, decoder, pending, done)));
                    }
                    None => {
                        done = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        },
    )
}
