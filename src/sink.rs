// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Tracing-backed event sink.
//
// The crate's own "view layer": progress goes to structured logs, and the
// terminal payload is dispatched to exactly one branch by evidence kind.

use crate::event::{ProgressEvent, ResultPayload};
use crate::stream::{EventSink, StreamError};

/// Logs the progress feed via `tracing`.
///
/// Soft errors and malformed records are warnings; the stream keeps going.
/// The terminal result is logged once with its classified kind, or a
/// warning when the shape matches no known evidence kind.
#[derive(Debug, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingSink {
    fn on_event(&self, event: ProgressEvent) {
        if event.is_soft_error() {
            // Not a failure: the pipeline reports the problem and continues.
            tracing::warn!(
                progress = event.progress_or_default(),
                message = event.message_or_default(),
                "analysis notice"
            );
        } else {
            tracing::info!(
                progress = event.progress_or_default(),
                message = event.message_or_default(),
                "analysis progress"
            );
        }

        if let Some(result) = &event.result {
            match ResultPayload::classify(result) {
                Some(payload) => match &payload {
                    ResultPayload::Memdump(_) => {
                        tracing::info!(kind = payload.kind(), "memory-dump report ready")
                    }
                    ResultPayload::DeepfakeVideo { .. } => {
                        tracing::info!(kind = payload.kind(), "video deepfake analysis ready")
                    }
                    ResultPayload::Steganography { .. } => {
                        tracing::info!(kind = payload.kind(), "steganography scan ready")
                    }
                    ResultPayload::ImageForensics(_) => {
                        tracing::info!(kind = payload.kind(), "image forensics ready")
                    }
                    ResultPayload::Document { .. } => {
                        tracing::info!(kind = payload.kind(), "document authenticity report ready")
                    }
                },
                None => tracing::warn!("unrecognized evidence result shape"),
            }
        }
    }

    fn on_malformed(&self, _payload: &str, reason: &str) {
        tracing::warn!(reason, "dropped malformed record, continuing");
    }

    fn on_error(&self, error: StreamError) {
        tracing::error!(%error, "analysis stream failed");
    }

    fn on_complete(&self) {
        tracing::info!("analysis stream complete");
    }
}
