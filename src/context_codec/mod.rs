//! Execution-context decoding.
//!
//! Contexts were written with different encodings over time. [`ContextCodec`]
//! tries each known encoding in order and never fails: when nothing decodes,
//! the caller gets a context made of diagnostic entries instead.

mod legacy_binary;

pub use legacy_binary::{decode_legacy, encode_legacy, LegacyValue};

use anyhow::{bail, Context, Result};
use base64::Engine;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

/// Prefix of the keys written into a context when a decoding stage fails.
pub const DIAGNOSTIC_KEY_PREFIX: &str = "context.deserialize.error.";

/// Decoded execution context: string keys to arbitrary values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeserializedContext {
    entries: Map<String, Value>,
    #[serde(skip)]
    diagnostic: bool,
}

impl DeserializedContext {
    pub fn from_map(entries: Map<String, Value>) -> Self {
        Self {
            entries,
            diagnostic: false,
        }
    }

    fn diagnostics(entries: Map<String, Value>) -> Self {
        Self {
            entries,
            diagnostic: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> &Map<String, Value> {
        &self.entries
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when no strategy could decode the blob and the entries are
    /// diagnostics rather than context data.
    pub fn is_diagnostic(&self) -> bool {
        self.diagnostic
    }
}

/// One way of turning stored bytes into a context map.
pub trait DecodeStrategy: Send + Sync {
    /// Stage name, used as the suffix of the diagnostic key.
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> Result<Map<String, Value>>;
}

/// JSON object, the encoding used by current writers.
pub struct StructuredStrategy;

impl DecodeStrategy for StructuredStrategy {
    fn name(&self) -> &'static str {
        "structured"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map<String, Value>> {
        if bytes.is_empty() {
            bail!("empty input");
        }
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(map) => Ok(map),
            other => bail!("expected a JSON object, found {}", json_kind(&other)),
        }
    }
}

/// Base64 text wrapping a legacy binary map.
pub struct Base64LegacyStrategy;

impl DecodeStrategy for Base64LegacyStrategy {
    fn name(&self) -> &'static str {
        "base64-legacy"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map<String, Value>> {
        let compact: Vec<u8> = bytes
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        let raw = base64::engine::general_purpose::STANDARD
            .decode(&compact)
            .context("base64 decode failed")?;
        decode_legacy(&raw)
    }
}

/// Legacy binary map stored as raw bytes.
pub struct LegacyStrategy;

impl DecodeStrategy for LegacyStrategy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn decode(&self, bytes: &[u8]) -> Result<Map<String, Value>> {
        decode_legacy(bytes)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ordered chain of decode strategies; the first success wins.
pub struct ContextCodec {
    strategies: Vec<Box<dyn DecodeStrategy>>,
}

impl Default for ContextCodec {
    fn default() -> Self {
        Self::new(vec![
            Box::new(StructuredStrategy),
            Box::new(Base64LegacyStrategy),
            Box::new(LegacyStrategy),
        ])
    }
}

impl ContextCodec {
    pub fn new(strategies: Vec<Box<dyn DecodeStrategy>>) -> Self {
        Self { strategies }
    }

    /// Decodes a stored context blob. Never fails.
    pub fn decode(&self, bytes: &[u8]) -> DeserializedContext {
        let mut diagnostics = Map::new();
        for strategy in &self.strategies {
            match strategy.decode(bytes) {
                Ok(map) => return DeserializedContext::from_map(map),
                Err(e) => {
                    diagnostics.insert(
                        format!("{}{}", DIAGNOSTIC_KEY_PREFIX, strategy.name()),
                        Value::String(e.to_string()),
                    );
                }
            }
        }

        let summary = serde_json::Value::Object(diagnostics.clone());
        warn!(
            "Could not decode execution context ({} bytes): {}",
            bytes.len(),
            summary
        );
        DeserializedContext::diagnostics(diagnostics)
    }

    /// Encodes a context the way current writers store it.
    pub fn encode(&self, entries: &Map<String, Value>) -> Result<String> {
        serde_json::to_string(entries).context("Failed to encode execution context")
    }
}
