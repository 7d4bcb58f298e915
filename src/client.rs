// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Analysis client.
//
// One call runs one analysis end to end: read the evidence file, submit it
// through the injected transport, drive the framer over the response stream
// with the caller's sink, and persist the terminal result through the
// injected store. Rendering stays with the sink; persistence is
// fire-and-forget.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::Config;
use crate::event::{ProgressEvent, ResultPayload};
use crate::store::{ResultEnvelope, ResultStore};
use crate::stream::{EventSink, FramerOutcome, StreamError, StreamFramer};
use crate::transport::{EvidenceUpload, Transport, TransportError};

/// Errors that end an analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AnalyzeError {
    #[error("failed to read evidence file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("analysis stream failed: {0}")]
    Stream(StreamError),

    #[error("analysis cancelled")]
    Cancelled,
}

/// Summary of one completed analysis run.
#[derive(Debug)]
pub struct AnalysisOutcome {
    pub analysis_id: Uuid,
    /// The classified terminal payload, if the result matched a known
    /// evidence kind.
    pub result: Option<ResultPayload>,
    /// The raw terminal `result` value, classified or not.
    pub raw_result: Option<serde_json::Value>,
    /// Well-formed events delivered to the sink.
    pub events: u64,
    /// Records dropped for unparseable payloads.
    pub malformed: u64,
}

/// Runs analyses against an evidence pipeline.
///
/// Transport and store are injected; concurrent analyses share one client,
/// each run owning its own framer and buffer.
pub struct AnalysisClient {
    transport: Arc<dyn Transport>,
    store: Arc<dyn ResultStore>,
    max_buffer_bytes: usize,
}

impl AnalysisClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn ResultStore>,
        config: &Config,
    ) -> Self {
        Self {
            transport,
            store,
            max_buffer_bytes: config.max_buffer_bytes,
        }
    }

    /// Upload the evidence file and consume its progress feed.
    ///
    /// Events reach `sink` in stream order. Each terminal event is handed to
    /// the store without blocking the feed; the last one wins in the
    /// returned outcome. Transport failure before or during streaming is
    /// fatal and reported both to the sink and in the returned error.
    pub async fn analyze(
        &self,
        path: &Path,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<AnalysisOutcome, AnalyzeError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|source| AnalyzeError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "evidence".to_string());
        let sha256 = hex_digest(&bytes);
        let analysis_id = Uuid::new_v4();

        tracing::info!(
            %analysis_id,
            filename,
            sha256,
            size = bytes.len(),
            "submitting evidence"
        );

        let upload = EvidenceUpload {
            filename: filename.clone(),
            bytes: bytes.into(),
        };

        let chunk_stream = match self.transport.submit(upload).await {
            Ok(stream) => stream,
            Err(e) => {
                sink.on_error(StreamError::Transport(e.to_string()));
                return Err(e.into());
            }
        };

        let capture = TerminalCapture {
            inner: sink,
            store: self.store.clone(),
            analysis_id,
            filename,
            sha256,
            result: Mutex::new(None),
        };

        let stats = StreamFramer::with_max_buffer_bytes(self.max_buffer_bytes)
            .run(chunk_stream, &capture, cancel)
            .await;

        match stats.outcome {
            FramerOutcome::Completed => {}
            FramerOutcome::Failed(error) => return Err(AnalyzeError::Stream(error)),
            FramerOutcome::Cancelled => return Err(AnalyzeError::Cancelled),
        }

        let raw_result = capture.result.into_inner().unwrap_or_default();
        let result = raw_result.as_ref().and_then(ResultPayload::classify);
        if let (Some(_), None) = (&raw_result, &result) {
            tracing::warn!(%analysis_id, "unrecognized evidence result shape");
        }

        Ok(AnalysisOutcome {
            analysis_id,
            result,
            raw_result,
            events: stats.events,
            malformed: stats.malformed,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Terminal capture
// ---------------------------------------------------------------------------

/// Sink wrapper that captures the terminal `result` and fires the save
/// before forwarding the event, matching the feed's save-then-render order.
struct TerminalCapture<'a> {
    inner: &'a dyn EventSink,
    store: Arc<dyn ResultStore>,
    analysis_id: Uuid,
    filename: String,
    sha256: String,
    result: Mutex<Option<serde_json::Value>>,
}

impl TerminalCapture<'_> {
    fn persist(&self, result: &serde_json::Value) {
        let envelope = ResultEnvelope {
            analysis_id: self.analysis_id,
            filename: self.filename.clone(),
            sha256: self.sha256.clone(),
            saved_at: chrono::Utc::now(),
            result: result.clone(),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save(&envelope).await {
                tracing::warn!(
                    analysis_id = %envelope.analysis_id,
                    error = %e,
                    "failed to persist analysis result"
                );
            }
        });
    }
}

impl EventSink for TerminalCapture<'_> {
    fn on_event(&self, event: ProgressEvent) {
        if let Some(result) = &event.result {
            *self.result.lock().expect("capture mutex poisoned") = Some(result.clone());
            self.persist(result);
        }
        self.inner.on_event(event);
    }

    fn on_malformed(&self, payload: &str, reason: &str) {
        self.inner.on_malformed(payload, reason);
    }

    fn on_error(&self, error: StreamError) {
        self.inner.on_error(error);
    }

    fn on_complete(&self) {
        self.inner.on_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{load_config, StringSource};
    use crate::store::MemoryResultStore;
    use crate::transport::ChunkStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    /// Transport that replays a canned body as a sequence of chunks.
    struct CannedTransport {
        chunks: Vec<Result<Bytes, String>>,
    }

    impl CannedTransport {
        fn body(body: &str) -> Self {
            Self {
                chunks: vec![Ok(Bytes::copy_from_slice(body.as_bytes()))],
            }
        }
    }

    #[async_trait]
    impl Transport for CannedTransport {
        async fn submit(&self, _upload: EvidenceUpload) -> Result<ChunkStream, TransportError> {
            let items: Vec<Result<Bytes, TransportError>> = self
                .chunks
                .iter()
                .map(|c| c.clone().map_err(TransportError::Body))
                .collect();
            Ok(Box::pin(tokio_stream::iter(items)))
        }
    }

    /// Transport that fails before producing any chunk.
    struct RejectingTransport;

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn submit(&self, _upload: EvidenceUpload) -> Result<ChunkStream, TransportError> {
            Err(TransportError::Status {
                status: 503,
                snippet: "pipeline down".to_string(),
            })
        }
    }

    /// Sink that counts callbacks.
    #[derive(Default)]
    struct CountingSink {
        events: AtomicU64,
        errors: AtomicU64,
        completions: AtomicU64,
    }

    impl EventSink for CountingSink {
        fn on_event(&self, _event: ProgressEvent) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: StreamError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn test_config() -> Config {
        let yaml = "evistream: v1\nendpoint: \"http://localhost/evidence/analyze/\"\n";
        load_config(&StringSource {
            content: yaml.to_string(),
        })
        .unwrap()
    }

    fn evidence_file(dir: &tempfile::TempDir, contents: &[u8]) -> PathBuf {
        let path = dir.path().join("evidence.jpg");
        std::fs::write(&path, contents).unwrap();
        path
    }

    async fn wait_for_save(store: &MemoryResultStore) {
        for _ in 0..100 {
            if !store.saved().is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("result was never persisted");
    }

    // -----------------------------------------------------------------------
    // Tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn full_run_classifies_and_persists_terminal_result() {
        let body = concat!(
            "data: {\"progress\":10,\"message\":\"Extracting metadata\"}\n\n",
            "data: {\"progress\":100,\"result\":{\"metadata\":{\"camera\":\"X100\"}}}\n\n",
        );
        let store = Arc::new(MemoryResultStore::new());
        let client = AnalysisClient::new(
            Arc::new(CannedTransport::body(body)),
            store.clone(),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"fake image bytes");
        let sink = CountingSink::default();

        let outcome = client
            .analyze(&path, &sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.events, 2);
        assert_eq!(outcome.malformed, 0);
        assert_eq!(
            outcome.result.as_ref().map(ResultPayload::kind),
            Some("image_forensics")
        );
        assert_eq!(sink.events.load(Ordering::SeqCst), 2);
        assert_eq!(sink.completions.load(Ordering::SeqCst), 1);

        wait_for_save(&store).await;
        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].analysis_id, outcome.analysis_id);
        assert_eq!(saved[0].filename, "evidence.jpg");
        assert_eq!(saved[0].sha256, hex_digest(b"fake image bytes"));
        assert_eq!(saved[0].result, json!({"metadata": {"camera": "X100"}}));
    }

    #[tokio::test]
    async fn unrecognized_result_shape_returns_raw_only() {
        let body = "data: {\"progress\":100,\"result\":{\"mystery\":1}}\n\n";
        let client = AnalysisClient::new(
            Arc::new(CannedTransport::body(body)),
            Arc::new(MemoryResultStore::new()),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"bytes");

        let outcome = client
            .analyze(&path, &CountingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.result.is_none());
        assert_eq!(outcome.raw_result, Some(json!({"mystery": 1})));
    }

    #[tokio::test]
    async fn stream_without_terminal_result_yields_empty_outcome() {
        let body = "data: {\"progress\":30}\n\n";
        let store = Arc::new(MemoryResultStore::new());
        let client = AnalysisClient::new(
            Arc::new(CannedTransport::body(body)),
            store.clone(),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"bytes");

        let outcome = client
            .analyze(&path, &CountingSink::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.result.is_none());
        assert!(outcome.raw_result.is_none());
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn transport_rejection_reaches_sink_and_caller() {
        let client = AnalysisClient::new(
            Arc::new(RejectingTransport),
            Arc::new(MemoryResultStore::new()),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"bytes");
        let sink = CountingSink::default();

        let err = client
            .analyze(&path, &sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalyzeError::Transport(_)));
        assert_eq!(sink.errors.load(Ordering::SeqCst), 1);
        assert_eq!(sink.events.load(Ordering::SeqCst), 0);
        assert_eq!(sink.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mid_stream_transport_failure_is_a_stream_error() {
        let transport = CannedTransport {
            chunks: vec![
                Ok(Bytes::from_static(b"data: {\"progress\":10}\n\n")),
                Err("reset by peer".to_string()),
            ],
        };
        let client = AnalysisClient::new(
            Arc::new(transport),
            Arc::new(MemoryResultStore::new()),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"bytes");
        let sink = CountingSink::default();

        let err = client
            .analyze(&path, &sink, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalyzeError::Stream(StreamError::Transport(_))));
        assert_eq!(sink.events.load(Ordering::SeqCst), 1);
        assert_eq!(sink.completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_evidence_file_fails_before_submitting() {
        let client = AnalysisClient::new(
            Arc::new(RejectingTransport),
            Arc::new(MemoryResultStore::new()),
            &test_config(),
        );

        let err = client
            .analyze(
                Path::new("/nonexistent/evidence.jpg"),
                &CountingSink::default(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AnalyzeError::ReadFile { .. }));
    }

    #[tokio::test]
    async fn cancelled_run_returns_cancelled() {
        let body = "data: {\"progress\":10}\n\n";
        let client = AnalysisClient::new(
            Arc::new(CannedTransport::body(body)),
            Arc::new(MemoryResultStore::new()),
            &test_config(),
        );

        let dir = tempfile::tempdir().unwrap();
        let path = evidence_file(&dir, b"bytes");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .analyze(&path, &CountingSink::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, AnalyzeError::Cancelled));
    }
}
