//! Compact tagged map format used by older context writers.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! magic "XCTX" | version u8 (=1) | entry count u32
//! per entry: key len u16 | key utf8 | tag u8 | value
//! ```
//!
//! Value encodings by tag: `0` null, `1` string (u32 len + utf8), `2` i64,
//! `3` f64, `4` bool (u8), `5` timestamp (i64 epoch millis).

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

pub const MAGIC: &[u8; 4] = b"XCTX";
pub const FORMAT_VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_LONG: u8 = 2;
const TAG_DOUBLE: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_TIMESTAMP: u8 = 5;

/// A single value as the legacy writers stored it.
#[derive(Debug, Clone, PartialEq)]
pub enum LegacyValue {
    Null,
    String(String),
    Long(i64),
    Double(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl LegacyValue {
    fn into_json(self) -> Value {
        match self {
            LegacyValue::Null => Value::Null,
            LegacyValue::String(s) => Value::String(s),
            LegacyValue::Long(v) => Value::Number(Number::from(v)),
            LegacyValue::Double(v) => Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null),
            LegacyValue::Bool(v) => Value::Bool(v),
            LegacyValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                anyhow!(
                    "unexpected end of input at byte {} (wanted {} more)",
                    self.pos,
                    len
                )
            })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(i64::from_be_bytes(buf))
    }

    fn string(&mut self, len: usize) -> Result<String> {
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).context("invalid utf-8 in string value")
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Decodes a legacy map. Fails on a bad header, truncated input, unknown tags
/// or trailing bytes.
pub fn decode_legacy(bytes: &[u8]) -> Result<Map<String, Value>> {
    let mut reader = Reader::new(bytes);
    let magic = reader.take(MAGIC.len()).context("missing header")?;
    if magic != MAGIC {
        bail!("not a legacy context stream (bad magic)");
    }
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        bail!("unsupported legacy context version {}", version);
    }

    let count = reader.u32()? as usize;
    let mut map = Map::new();
    for _ in 0..count {
        let key_len = reader.u16()? as usize;
        let key = reader.string(key_len)?;
        let value = match reader.u8()? {
            TAG_NULL => LegacyValue::Null,
            TAG_STRING => {
                let len = reader.u32()? as usize;
                LegacyValue::String(reader.string(len)?)
            }
            TAG_LONG => LegacyValue::Long(reader.i64()?),
            TAG_DOUBLE => LegacyValue::Double(f64::from_bits(reader.i64()? as u64)),
            TAG_BOOL => LegacyValue::Bool(reader.u8()? != 0),
            TAG_TIMESTAMP => {
                let millis = reader.i64()?;
                let ts = DateTime::<Utc>::from_timestamp_millis(millis)
                    .ok_or_else(|| anyhow!("timestamp out of range for key {}", key))?;
                LegacyValue::Timestamp(ts)
            }
            other => bail!("unknown value tag {} for key {}", other, key),
        };
        map.insert(key, value.into_json());
    }

    if reader.remaining() > 0 {
        bail!("{} trailing bytes after last entry", reader.remaining());
    }
    Ok(map)
}

/// Encodes entries in the legacy layout. Only fixtures and migration helpers
/// write this format; current writers store JSON.
pub fn encode_legacy(entries: &[(String, LegacyValue)]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(16 + entries.len() * 16);
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    let count = u32::try_from(entries.len()).context("too many entries")?;
    out.extend_from_slice(&count.to_be_bytes());

    for (key, value) in entries {
        let key_len = u16::try_from(key.len())
            .with_context(|| format!("key too long: {} bytes", key.len()))?;
        out.extend_from_slice(&key_len.to_be_bytes());
        out.extend_from_slice(key.as_bytes());
        match value {
            LegacyValue::Null => out.push(TAG_NULL),
            LegacyValue::String(s) => {
                out.push(TAG_STRING);
                let len = u32::try_from(s.len()).context("string value too long")?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(s.as_bytes());
            }
            LegacyValue::Long(v) => {
                out.push(TAG_LONG);
                out.extend_from_slice(&v.to_be_bytes());
            }
            LegacyValue::Double(v) => {
                out.push(TAG_DOUBLE);
                out.extend_from_slice(&v.to_bits().to_be_bytes());
            }
            LegacyValue::Bool(v) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*v));
            }
            LegacyValue::Timestamp(ts) => {
                out.push(TAG_TIMESTAMP);
                out.extend_from_slice(&ts.timestamp_millis().to_be_bytes());
            }
        }
    }
    Ok(out)
}
