// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Stream types.
//
// Core types for progress-feed framing: the sink contract, framing
// errors, and the per-run outcome.

use crate::event::ProgressEvent;

/// Maximum bytes the framer retains between chunks (partial record plus any
/// unconsumed noise) before the stream is aborted.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 1_048_576; // 1 MiB

/// Receives the framer's callbacks.
///
/// Callbacks run synchronously on the framer's task, strictly in stream
/// order, and exactly one of `on_error`/`on_complete` ends a run (neither
/// fires after cancellation). Implementations needing mutable state use
/// interior mutability; the framer only ever holds a shared reference.
pub trait EventSink: Send + Sync {
    /// One well-formed decoded record. Called once per record, in order,
    /// before the next chunk is requested.
    fn on_event(&self, event: ProgressEvent);

    /// A record whose payload failed JSON parsing. Non-fatal: the record is
    /// dropped and framing continues. Default is to ignore it.
    fn on_malformed(&self, payload: &str, reason: &str) {
        let _ = (payload, reason);
    }

    /// The stream failed. Terminal; no further callbacks follow.
    fn on_error(&self, error: StreamError);

    /// The transport closed and any trailing complete record has been
    /// flushed. Called exactly once per completed run.
    fn on_complete(&self);
}

/// Fatal errors that end a framing run.
///
/// Record-level problems (malformed JSON payloads) are deliberately not in
/// this enum — they are reported through `EventSink::on_malformed` and never
/// stop the stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    /// The transport failed while streaming (network error, dropped
    /// connection). Reported once; the framer does not retry.
    #[error("transport failed while streaming: {0}")]
    Transport(String),

    /// The retained buffer grew past the configured limit without a
    /// complete record.
    #[error("stream buffer exceeded {limit} byte limit without a complete record")]
    BufferOverflow { limit: usize },
}

/// How a framing run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum FramerOutcome {
    /// Transport closed normally; `on_complete` was delivered.
    Completed,
    /// A fatal error was delivered through `on_error`.
    Failed(StreamError),
    /// Cancellation was observed; no terminal callback was delivered.
    Cancelled,
}

/// Summary of one framing run.
#[derive(Debug, Clone, PartialEq)]
pub struct FramerStats {
    pub outcome: FramerOutcome,
    /// Well-formed records emitted via `on_event`.
    pub events: u64,
    /// Records dropped for unparseable payloads. Callers wanting a give-up
    /// policy for noisy upstreams can build one on this counter; the framer
    /// itself never aborts on malformed records.
    pub malformed: u64,
}
