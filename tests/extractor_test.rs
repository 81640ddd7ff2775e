//! Round-trip laws for the AI-output normalizer: extraction followed by a
//! strict decode is the identity on any well-formed fenced-or-plain payload.

use serde_json::{Value, json};
use story_orchestrator::util::json::{decode_strict, extract_json_content, validate_json};

fn documents() -> Vec<Value> {
    vec![
        json!({}),
        json!({"t": "title", "sd": "short"}),
        json!({"nested": {"deep": {"ch": [{"t": "go"}, {"t": "stay"}]}}}),
        json!({"unicode": "tempête sur le quai", "n": 42, "f": 0.5, "b": true}),
        json!([{"id": "a"}, {"id": "b"}]),
    ]
}

#[test]
fn plain_payloads_roundtrip() {
    for doc in documents() {
        let raw = doc.to_string();
        let decoded: Value = decode_strict(&extract_json_content(&raw)).unwrap();
        assert_eq!(decoded, doc);
    }
}

#[test]
fn fenced_payloads_roundtrip() {
    for doc in documents() {
        for wrapped in [
            format!("```json\n{doc}\n```"),
            format!("```\n{doc}\n```"),
            format!("Sure! Here is the JSON you asked for:\n```json\n{doc}\n```\nAnything else?"),
        ] {
            let decoded: Value = decode_strict(&extract_json_content(&wrapped)).unwrap();
            assert_eq!(decoded, doc, "failed for wrapper {wrapped:?}");
        }
    }
}

#[test]
fn truncated_objects_are_repaired() {
    let raw = "{\"a\": {\"b\": {\"c\": 1}";
    let repaired = extract_json_content(raw);
    validate_json(&repaired).unwrap();
    let decoded: Value = decode_strict(&repaired).unwrap();
    assert_eq!(decoded["a"]["b"]["c"], 1);
}

#[test]
fn over_closed_objects_are_trimmed() {
    let raw = "{\"a\": 1}}}}";
    let repaired = extract_json_content(raw);
    validate_json(&repaired).unwrap();
}

#[test]
fn repair_does_not_rescue_garbage() {
    let repaired = extract_json_content("the model had a bad day");
    assert!(validate_json(&repaired).is_err());
}
