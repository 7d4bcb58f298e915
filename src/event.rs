// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Internal event representation.
//
// These are the canonical types the rest of the crate operates on.
// The stream framer produces `ProgressEvent`s, and every downstream
// consumer (sinks, the client, the store) works in terms of them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded progress event from the analysis feed.
///
/// Every field is optional: the server is free to omit any of them, and
/// consumers fall back to defaults instead of failing. A well-formed JSON
/// payload that is not an object (e.g. `data: 42`) decodes to an event with
/// all fields absent rather than being treated as malformed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Completion percentage, 0–100. Monotonically non-decreasing by
    /// convention, not enforced.
    pub progress: Option<f64>,
    /// Human-readable status line.
    pub message: Option<String>,
    /// Soft-error marker. Truthy means "inform the user, keep going".
    pub error: Option<Value>,
    /// Terminal payload. Present exactly once per analysis, on the last
    /// meaningful event.
    pub result: Option<Value>,
}

impl ProgressEvent {
    /// Decode an event from an already-parsed JSON value.
    ///
    /// Non-object values produce an empty event; unknown object fields are
    /// ignored.
    pub fn from_value(value: Value) -> Self {
        let mut map = match value {
            Value::Object(map) => map,
            _ => return Self::default(),
        };
        Self {
            progress: map.get("progress").and_then(Value::as_f64),
            message: map
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            error: map.remove("error"),
            result: map.remove("result"),
        }
    }

    /// Completion percentage with the consumer-side default of 0.
    pub fn progress_or_default(&self) -> f64 {
        self.progress.unwrap_or(0.0)
    }

    /// Status line with the consumer-side default.
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("Processing...")
    }

    /// Whether this event carries a soft error.
    ///
    /// The server marks soft errors with any truthy `error` value; absent,
    /// `null`, `false`, `0` and `""` all mean "no error".
    pub fn is_soft_error(&self) -> bool {
        truthy(self.error.as_ref())
    }

    /// Whether this is the terminal event of an analysis.
    pub fn is_terminal(&self) -> bool {
        self.result.is_some()
    }
}

/// JS-style truthiness, the convention the feed's producers follow.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

// ---------------------------------------------------------------------------
// Result classification
// ---------------------------------------------------------------------------

/// The terminal `result` payload, classified by evidence kind.
///
/// The feed discriminates result kinds by which keys are present, not by an
/// explicit tag. Classification checks the keys in a fixed precedence order,
/// most specific first:
///
/// 1. `memdump`
/// 2. `deepfake_video`
/// 3. `steganographic_detection`
/// 4. `deepfake_detection` | `forgery_detection` | `metadata`
/// 5. `report` + `text_detection`
///
/// A result matching more than one discriminator takes the highest-precedence
/// variant; a result matching none is unrecognized (`classify` returns
/// `None`) and the consumer logs a warning and renders nothing.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPayload {
    /// Memory-dump parse report.
    Memdump(Value),
    /// Video deepfake detection. The sibling `task_data` and `hashes`
    /// fields travel with the analysis, as consumers merge them in.
    DeepfakeVideo {
        analysis: Value,
        task_data: Option<Value>,
        hashes: Option<Value>,
    },
    /// Steganography scan. Keeps the full result (consumers read sibling
    /// fields) alongside the stego sub-object itself.
    Steganography { result: Value, stego: Value },
    /// Image forensics: deepfake, forgery and/or metadata analysis.
    ImageForensics(Value),
    /// Document-authenticity report.
    Document {
        text_detection: Value,
        report: Value,
        hashes: Option<Value>,
    },
}

impl ResultPayload {
    /// Classify a terminal `result` value by discriminator-key presence.
    ///
    /// Keys are checked for truthiness, not mere presence: `"memdump": null`
    /// does not select the memdump variant.
    pub fn classify(result: &Value) -> Option<Self> {
        if truthy(result.get("memdump")) {
            return Some(Self::Memdump(result["memdump"].clone()));
        }
        if truthy(result.get("deepfake_video")) {
            return Some(Self::DeepfakeVideo {
                analysis: result["deepfake_video"].clone(),
                task_data: result.get("task_data").cloned(),
                hashes: result.get("hashes").cloned(),
            });
        }
        if truthy(result.get("steganographic_detection")) {
            return Some(Self::Steganography {
                result: result.clone(),
                stego: result["steganographic_detection"].clone(),
            });
        }
        if truthy(result.get("deepfake_detection"))
            || truthy(result.get("forgery_detection"))
            || truthy(result.get("metadata"))
        {
            return Some(Self::ImageForensics(result.clone()));
        }
        if truthy(result.get("report")) && truthy(result.get("text_detection")) {
            return Some(Self::Document {
                text_detection: result["text_detection"].clone(),
                report: result["report"].clone(),
                hashes: result.get("hashes").cloned(),
            });
        }
        None
    }

    /// Short stable name of the evidence kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memdump(_) => "memdump",
            Self::DeepfakeVideo { .. } => "deepfake_video",
            Self::Steganography { .. } => "steganography",
            Self::ImageForensics(_) => "image_forensics",
            Self::Document { .. } => "document",
        }
    }
}
