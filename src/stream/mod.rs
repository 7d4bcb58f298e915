// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Progress-feed framing.
//
// Responsibilities:
// - Reassemble `data: <json>\n\n` records from arbitrarily-chunked bytes
// - Streaming-safe UTF-8 decode (multi-byte chars may split across chunks)
// - Emit decoded events in stream order, all records of a chunk before the
//   next read
// - Drop malformed payloads without aborting the stream
// - Memory-bounded: 1 MiB retained buffer by default
// - Cooperative cancellation; no callbacks after cancel

mod framer;
mod types;

pub use framer::StreamFramer;
pub use types::{
    EventSink, FramerOutcome, FramerStats, StreamError, DEFAULT_MAX_BUFFER_BYTES,
};
