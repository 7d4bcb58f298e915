// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Stream framer.
//
// Takes an arbitrarily-chunked byte stream, reassembles `data: <json>\n\n`
// records across chunk boundaries, and delivers each decoded event to an
// injected sink. All complete records in a chunk are emitted, in order,
// before the next chunk is requested.

use super::types::{EventSink, FramerOutcome, FramerStats, StreamError, DEFAULT_MAX_BUFFER_BYTES};
use crate::event::ProgressEvent;
use bytes::Bytes;
use std::fmt;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

/// Record start marker. Case-sensitive, no leading whitespace required.
const MARKER: &[u8] = b"data:";

/// Record terminator: the first double newline after the marker.
const TERMINATOR: &[u8] = b"\n\n";

/// Reassembles a chunked progress feed into discrete JSON events.
///
/// One framer instance owns one buffer and serves one stream; concurrent
/// analyses each construct their own. The framer is consumed by [`run`]:
/// terminal states (completed, failed, cancelled) have no way back.
///
/// [`run`]: StreamFramer::run
pub struct StreamFramer {
    /// Decoded text not yet consumed: at most a trailing partial record,
    /// plus any stray bytes awaiting a marker.
    buffer: String,
    /// Undecoded tail of a UTF-8 sequence split across chunks.
    carry: Vec<u8>,
    max_buffer_bytes: usize,
    events: u64,
    malformed: u64,
}

impl Default for StreamFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::with_max_buffer_bytes(DEFAULT_MAX_BUFFER_BYTES)
    }

    /// Create a framer with a custom retained-buffer bound.
    pub fn with_max_buffer_bytes(max_buffer_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            carry: Vec::new(),
            max_buffer_bytes,
            events: 0,
            malformed: 0,
        }
    }

    /// Consume the source stream, delivering callbacks to `sink`.
    ///
    /// The source yields chunks until the transport closes (`None`) or fails
    /// (`Err`). A transport failure is reported once via `on_error` and ends
    /// the run; on normal close a trailing complete record (if any) is
    /// flushed and `on_complete` fires exactly once. Cancellation is checked
    /// before each read and before each callback; once observed, no further
    /// callbacks fire.
    pub async fn run<S, E>(
        mut self,
        mut source: S,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> FramerStats
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: fmt::Display,
    {
        loop {
            if cancel.is_cancelled() {
                return self.finish(FramerOutcome::Cancelled);
            }

            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.finish(FramerOutcome::Cancelled),
                item = source.next() => item,
            };

            let chunk = match item {
                None => break,
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    if cancel.is_cancelled() {
                        return self.finish(FramerOutcome::Cancelled);
                    }
                    let error = StreamError::Transport(e.to_string());
                    sink.on_error(error.clone());
                    return self.finish(FramerOutcome::Failed(error));
                }
            };

            self.decode_append(&chunk);

            if !self.drain(sink, cancel) {
                return self.finish(FramerOutcome::Cancelled);
            }

            // Only unconsumed tail counts against the bound; complete
            // records were drained above.
            if self.buffer.len() > self.max_buffer_bytes {
                if cancel.is_cancelled() {
                    return self.finish(FramerOutcome::Cancelled);
                }
                let error = StreamError::BufferOverflow {
                    limit: self.max_buffer_bytes,
                };
                sink.on_error(error.clone());
                return self.finish(FramerOutcome::Failed(error));
            }
        }

        // Transport closed: flush a trailing complete record if one remains;
        // leftover partial bytes are discarded.
        if !self.buffer.is_empty() && !self.drain(sink, cancel) {
            return self.finish(FramerOutcome::Cancelled);
        }
        if cancel.is_cancelled() {
            return self.finish(FramerOutcome::Cancelled);
        }
        sink.on_complete();
        self.finish(FramerOutcome::Completed)
    }

    fn finish(self, outcome: FramerOutcome) -> FramerStats {
        FramerStats {
            outcome,
            events: self.events,
            malformed: self.malformed,
        }
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Append a chunk, carrying partial UTF-8 sequences across calls.
    fn decode_append(&mut self, chunk: &[u8]) {
        if self.carry.is_empty() {
            self.decode_bytes(chunk);
        } else {
            self.carry.extend_from_slice(chunk);
            let pending = std::mem::take(&mut self.carry);
            self.decode_bytes(&pending);
        }
    }

    /// Decode as much of `bytes` as possible into the buffer.
    ///
    /// An incomplete trailing sequence (at most 3 bytes) is stashed in
    /// `carry` for the next chunk; a genuinely invalid sequence is replaced
    /// with U+FFFD and decoding continues, matching a non-fatal streaming
    /// text decoder.
    fn decode_bytes(&mut self, mut bytes: &[u8]) {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.buffer.push_str(text);
                    }
                    match err.error_len() {
                        None => {
                            self.carry = rest.to_vec();
                            return;
                        }
                        Some(skip) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[skip..];
                        }
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Record scanning
    // -----------------------------------------------------------------------

    /// Emit every complete record currently in the buffer, compacting the
    /// buffer down to the unconsumed tail.
    ///
    /// Returns `false` if cancellation was observed before a callback.
    ///
    /// The scan walks byte-by-byte: content that is not a `data:` marker is
    /// skipped one byte at a time (stray bytes between records are
    /// tolerated), which also guarantees forward progress when no marker is
    /// present at all. Skipped noise is only discarded once a complete
    /// record past it is consumed; a buffer with no complete record is
    /// retained whole, since its tail may be a partial marker.
    fn drain(&mut self, sink: &dyn EventSink, cancel: &CancellationToken) -> bool {
        let bytes = self.buffer.as_bytes();
        let mut i = 0;
        let mut consumed = 0;

        while i < bytes.len() {
            if !bytes[i..].starts_with(MARKER) {
                i += 1;
                continue;
            }
            let payload_start = i + MARKER.len();
            let Some(rel) = find_terminator(&bytes[payload_start..]) else {
                // Partial record: keep it (and nothing before it) for the
                // next chunk.
                consumed = i;
                break;
            };

            if cancel.is_cancelled() {
                return false;
            }

            // Marker and terminator are ASCII, so these are char boundaries.
            let payload = &self.buffer[payload_start..payload_start + rel];
            match serde_json::from_str::<serde_json::Value>(payload) {
                Ok(value) => {
                    sink.on_event(ProgressEvent::from_value(value));
                    self.events += 1;
                }
                Err(e) => {
                    sink.on_malformed(payload, &e.to_string());
                    self.malformed += 1;
                }
            }

            i = payload_start + rel + TERMINATOR.len();
            consumed = i;
        }

        self.buffer.drain(..consumed);
        true
    }
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}
