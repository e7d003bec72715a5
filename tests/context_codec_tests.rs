mod common;

use base64::Engine;
use chrono::{TimeZone, Utc};
use common::TestHistory;
use execution_history::context_codec::{encode_legacy, LegacyValue, DIAGNOSTIC_KEY_PREFIX};
use execution_history::execution_store::{BatchStatus, ExecutionRepository};
use execution_history::lifecycle::LifecycleSettings;
use execution_history::ContextCodec;
use rusqlite::params;
use serde_json::{json, Map, Value};

/// Deterministic byte noise, so failures can be replayed.
fn noise(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed;
    (0..len)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (state >> 33) as u8
        })
        .collect()
}

fn legacy_blob() -> Vec<u8> {
    encode_legacy(&[
        ("reader.offset".to_string(), LegacyValue::Long(1200)),
        ("source".to_string(), LegacyValue::String("orders.csv".to_string())),
        (
            "checkpoint".to_string(),
            LegacyValue::Timestamp(Utc.with_ymd_and_hms(2023, 5, 1, 8, 30, 0).unwrap()),
        ),
    ])
    .unwrap()
}

#[test]
fn test_decode_never_fails_on_arbitrary_bytes() {
    let codec = ContextCodec::default();
    for seed in 0..200u64 {
        let bytes = noise(seed, (seed as usize * 7) % 300);
        let context = codec.decode(&bytes);
        if context.is_diagnostic() {
            assert_eq!(context.len(), 3, "seed {}", seed);
            assert!(context
                .entries()
                .keys()
                .all(|k| k.starts_with(DIAGNOSTIC_KEY_PREFIX)));
        }
    }
}

#[test]
fn test_decode_every_known_encoding() {
    let codec = ContextCodec::default();

    let structured = codec.decode(br#"{"reader.offset": 1200, "source": "orders.csv"}"#);
    assert!(!structured.is_diagnostic());
    assert_eq!(structured.get("reader.offset"), Some(&json!(1200)));

    let encoded = base64::engine::general_purpose::STANDARD.encode(legacy_blob());
    let from_base64 = codec.decode(encoded.as_bytes());
    assert!(!from_base64.is_diagnostic());
    assert_eq!(from_base64.get("source"), Some(&json!("orders.csv")));

    let raw = codec.decode(&legacy_blob());
    assert_eq!(raw, from_base64);
    assert_eq!(raw.len(), 3);
}

#[test]
fn test_non_object_json_and_empty_input_are_diagnostics() {
    let codec = ContextCodec::default();
    for input in [&b"[1, 2, 3]"[..], b"\"text\"", b"42", b"", b"   "] {
        let context = codec.decode(input);
        assert!(context.is_diagnostic(), "{:?}", input);
        assert_eq!(context.len(), 3);
        assert!(context
            .get(&format!("{}structured", DIAGNOSTIC_KEY_PREFIX))
            .is_some());
    }
}

#[test]
fn test_stored_contexts_decode_through_service() {
    let history = TestHistory::new();
    let target = history.target("legacy").clone();
    let json_id = history.insert("legacy", None, "import", BatchStatus::Completed);
    let legacy_id = history.insert("legacy", None, "export", BatchStatus::Completed);
    let broken_id = history.insert("legacy", None, "report", BatchStatus::Completed);

    let mut entries = Map::new();
    entries.insert("source".to_string(), Value::String("orders.csv".to_string()));
    history
        .repository
        .save_execution_context(&target, json_id, &entries)
        .unwrap();

    let table = target.job_table("JOB_EXECUTION_CONTEXT");
    history
        .client
        .with_conn(|conn| {
            let sql = format!(
                "INSERT INTO {} (JOB_EXECUTION_ID, SHORT_CONTEXT, SERIALIZED_CONTEXT) VALUES (?1, ?2, ?3)",
                table
            );
            conn.execute(&sql, params![legacy_id, "", legacy_blob()])?;
            conn.execute(&sql, params![broken_id, "", noise(7, 64)])?;
            Ok(())
        })
        .unwrap();

    let service = history.service(LifecycleSettings::default());

    let json_ctx = service.get_execution(json_id, None).unwrap().context.unwrap();
    assert_eq!(json_ctx.into_map(), entries);

    let legacy_ctx = service.get_execution(legacy_id, None).unwrap().context.unwrap();
    assert_eq!(legacy_ctx.get("reader.offset"), Some(&json!(1200)));

    let broken = service.get_execution(broken_id, None).unwrap();
    assert_eq!(broken.record.name, "report");
    assert!(broken.context.unwrap().is_diagnostic());
}
