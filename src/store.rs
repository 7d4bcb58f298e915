// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Result persistence.
//
// The terminal event's `result` is persisted as a JSON envelope. Saving is
// fire-and-forget from the caller's point of view: a failed save is logged,
// never fatal to the analysis.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

/// What gets written for one completed analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub analysis_id: Uuid,
    /// Name of the uploaded evidence file.
    pub filename: String,
    /// SHA-256 hex digest of the uploaded bytes, for chain-of-custody checks.
    pub sha256: String,
    pub saved_at: DateTime<Utc>,
    /// The raw terminal `result` payload, unclassified.
    pub result: Value,
}

/// Errors from persisting a result envelope.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to serialize result envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Sink for terminal analysis results.
///
/// Implementations must be Send + Sync; the client fires saves without
/// awaiting them on the analysis path.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save(&self, envelope: &ResultEnvelope) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Writes one pretty-printed JSON file per analysis into a results
/// directory, named by analysis id.
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the given analysis would be saved under.
    pub fn path_for(&self, analysis_id: Uuid) -> PathBuf {
        self.dir.join(format!("{analysis_id}.json"))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save(&self, envelope: &ResultEnvelope) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StoreError::WriteFile {
                path: self.dir.clone(),
                source: e,
            })?;

        let path = self.path_for(envelope.analysis_id);
        let json = serde_json::to_string_pretty(envelope)?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| StoreError::WriteFile { path, source: e })?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Keeps envelopes in memory. Used for testing.
#[derive(Default)]
pub struct MemoryResultStore {
    saved: std::sync::Mutex<Vec<ResultEnvelope>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<ResultEnvelope> {
        self.saved.lock().expect("store mutex poisoned").clone()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save(&self, envelope: &ResultEnvelope) -> Result<(), StoreError> {
        self.saved
            .lock()
            .expect("store mutex poisoned")
            .push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope() -> ResultEnvelope {
        ResultEnvelope {
            analysis_id: Uuid::new_v4(),
            filename: "evidence.jpg".to_string(),
            sha256: "deadbeef".to_string(),
            saved_at: Utc::now(),
            result: json!({"metadata": {"camera": "X100"}}),
        }
    }

    #[tokio::test]
    async fn file_store_writes_envelope_under_analysis_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        let envelope = envelope();

        store.save(&envelope).await.unwrap();

        let written = std::fs::read_to_string(store.path_for(envelope.analysis_id)).unwrap();
        let read_back: ResultEnvelope = serde_json::from_str(&written).unwrap();
        assert_eq!(read_back, envelope);
    }

    #[tokio::test]
    async fn file_store_creates_missing_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/results");
        let store = FileResultStore::new(&nested);

        store.save(&envelope()).await.unwrap();

        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn memory_store_records_saves_in_order() {
        let store = MemoryResultStore::new();
        let first = envelope();
        let second = envelope();

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let saved = store.saved();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].analysis_id, first.analysis_id);
        assert_eq!(saved[1].analysis_id, second.analysis_id);
    }
}
