// Copyright 2026 The Evistream Project
// SPDX-License-Identifier: Apache-2.0

// Config loader and validator.
//
// Loads evistream.yaml, validates structure, resolves variable
// interpolation, and applies defaults.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Default request timeout: analyses stream for a while, so this covers the
/// whole exchange, not one round trip.
pub const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Default results directory for the file-backed store.
pub const DEFAULT_RESULTS_DIR: &str = "./results";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// All errors that can occur during config loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config source: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("undefined variable ${{{name}}} in config (not set in environment)")]
    UndefinedVariable { name: String },
}

// ---------------------------------------------------------------------------
// ConfigSource trait (interface-first, dependency injection)
// ---------------------------------------------------------------------------

/// Abstraction over where config YAML comes from.
///
/// `FileSource` reads from disk; `StringSource` provides content directly
/// (used in tests to avoid file I/O).
pub trait ConfigSource {
    fn load(&self) -> Result<String, ConfigError>;
}

/// Loads config from a file on disk.
pub struct FileSource {
    pub path: PathBuf,
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(std::fs::read_to_string(&self.path)?)
    }
}

/// Provides config content directly as a string. Used for testing.
pub struct StringSource {
    pub content: String,
}

impl ConfigSource for StringSource {
    fn load(&self) -> Result<String, ConfigError> {
        Ok(self.content.clone())
    }
}

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

/// Parsed and validated evistream config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Contract version. Always "v1".
    pub version: String,
    /// Analyze endpoint URL, variables resolved. Always http(s).
    pub endpoint: String,
    /// Extra request headers, sorted by name, variables resolved.
    pub headers: Vec<(String, String)>,
    /// Whole-request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Framer retained-buffer bound in bytes.
    pub max_buffer_bytes: usize,
    /// Directory the file-backed result store writes to.
    pub results_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Raw YAML deserialization types (internal)
// ---------------------------------------------------------------------------
// Separate from the public Config because defaults, interpolation and
// validation happen between raw and public, keeping the public type clean.

mod raw {
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, Deserialize)]
    pub struct RawConfig {
        pub evistream: String,
        pub endpoint: String,
        #[serde(default)]
        pub headers: BTreeMap<String, String>,
        pub request: Option<RawRequest>,
        pub stream: Option<RawStream>,
        pub results: Option<RawResults>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RawRequest {
        pub timeout_ms: Option<u64>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RawStream {
        pub max_buffer_bytes: Option<usize>,
    }

    #[derive(Debug, Deserialize)]
    pub struct RawResults {
        pub dir: Option<String>,
    }
}

// ---------------------------------------------------------------------------
// Variable interpolation
// ---------------------------------------------------------------------------

/// Resolves `${VAR_NAME}` references in a string from environment variables.
/// Returns `ConfigError::UndefinedVariable` if a referenced variable is not set.
fn resolve_variables(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut found_close = false;
            for c in chars.by_ref() {
                if c == '}' {
                    found_close = true;
                    break;
                }
                var_name.push(c);
            }
            if !found_close || var_name.is_empty() {
                // Malformed interpolation -- treat literally
                result.push('$');
                result.push('{');
                result.push_str(&var_name);
                continue;
            }
            let value = std::env::var(&var_name).map_err(|_| ConfigError::UndefinedVariable {
                name: var_name.clone(),
            })?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

// ---------------------------------------------------------------------------
// Config loading and validation
// ---------------------------------------------------------------------------

/// Load and validate an evistream config from the given source.
///
/// Steps:
/// 1. Read raw YAML from source
/// 2. Parse into raw deserialization types
/// 3. Validate the contract version and required fields
/// 4. Resolve variable interpolation in endpoint and header values
/// 5. Apply defaults and build the typed Config
pub fn load_config(source: &dyn ConfigSource) -> Result<Config, ConfigError> {
    let raw_yaml = source.load()?;
    let raw: raw::RawConfig = serde_yaml::from_str(&raw_yaml)?;

    if raw.evistream != "v1" {
        return Err(ConfigError::Validation(format!(
            "unsupported contract version \"{}\", expected \"v1\"",
            raw.evistream
        )));
    }

    let endpoint = resolve_variables(&raw.endpoint)?;
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::Validation(format!(
            "endpoint \"{endpoint}\" must be an http(s) URL"
        )));
    }

    let headers = resolve_headers(raw.headers)?;

    let timeout_ms = raw
        .request
        .and_then(|r| r.timeout_ms)
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    let max_buffer_bytes = raw
        .stream
        .and_then(|s| s.max_buffer_bytes)
        .unwrap_or(crate::stream::DEFAULT_MAX_BUFFER_BYTES);
    if max_buffer_bytes == 0 {
        return Err(ConfigError::Validation(
            "stream.max_buffer_bytes must be greater than zero".to_string(),
        ));
    }

    let results_dir = raw
        .results
        .and_then(|r| r.dir)
        .unwrap_or_else(|| DEFAULT_RESULTS_DIR.to_string());

    Ok(Config {
        version: raw.evistream,
        endpoint,
        headers,
        timeout_ms,
        max_buffer_bytes,
        results_dir: PathBuf::from(results_dir),
    })
}

fn resolve_headers(
    raw: BTreeMap<String, String>,
) -> Result<Vec<(String, String)>, ConfigError> {
    let mut headers = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        headers.push((name, resolve_variables(&value)?));
    }
    Ok(headers)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
