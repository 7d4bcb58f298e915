// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Transport seam.
//
// Responsibilities:
// - Submit an evidence upload, yielding the raw response chunk stream
// - Surface HTTP-level failure (connect error, non-2xx) before any chunk
//   is produced
// - No retry: retry policy belongs to callers

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use std::pin::Pin;
use std::time::Duration;

use crate::config::Config;

/// How much of a non-2xx response body is kept for diagnostics.
const ERROR_SNIPPET_CHARS: usize = 256;

/// One evidence file handed to the analysis endpoint.
#[derive(Debug, Clone)]
pub struct EvidenceUpload {
    /// Filename reported to the server (multipart part filename).
    pub filename: String,
    pub bytes: Bytes,
}

/// The raw response body, chunked however the network delivers it.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Errors raised by the transport before or during streaming.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The request could not be sent or no response arrived.
    #[error("analyze request failed: {0}")]
    Request(String),

    /// The endpoint answered with a non-success status.
    #[error("analyze endpoint returned HTTP {status}: {snippet}")]
    Status { status: u16, snippet: String },

    /// The response stream failed mid-body.
    #[error("response stream failed: {0}")]
    Body(String),
}

/// Abstraction over how an upload reaches the analysis pipeline.
///
/// Implementations must be Send + Sync so they can be shared across
/// concurrent analyses via `Arc`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit the upload and return the response chunk stream.
    ///
    /// HTTP-level failure is reported here, before any chunk is produced;
    /// mid-stream failures surface as `Err` items on the returned stream.
    async fn submit(&self, upload: EvidenceUpload) -> Result<ChunkStream, TransportError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Reqwest-backed transport: multipart POST to the configured analyze
/// endpoint, response body exposed as a byte stream.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// Build a transport from the loaded config.
    ///
    /// The request timeout covers the whole exchange including the progress
    /// stream, so it is sized for a full analysis, not a single round trip.
    pub fn from_config(config: &Config) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            headers: config.headers.clone(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn submit(&self, upload: EvidenceUpload) -> Result<ChunkStream, TransportError> {
        let part = reqwest::multipart::Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.clone());
        let form = reqwest::multipart::Form::new().part("file", part);

        let mut request = self.client.post(&self.endpoint).multipart(form);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_SNIPPET_CHARS).collect();
            return Err(TransportError::Status {
                status: status.as_u16(),
                snippet,
            });
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| TransportError::Body(e.to_string()));
        Ok(Box::pin(stream))
    }
}
