//! Lenient parsing of provider payloads.
//!
//! Providers wrap their answers in a handful of shapes, and the socket
//! provider often forwards model output still wrapped in a Markdown code
//! fence. Nothing in here returns an error: unparseable input becomes either
//! plain display text or an empty response flagged as `degraded`.

use crate::models::{MedicineRecommendation, ProviderResponse, Severity, Source};
use serde_json::{Map, Value};
use tracing::debug;

/// Keys that may hold the free-text analysis, in lookup order.
const TEXT_KEYS: &[&str] = &["analysisText", "analysis", "message", "response", "text", "result"];

/// Keys that may hold the medicine list.
const MEDICINE_KEYS: &[&str] = &["medicines", "recommendations"];

/// Nested payloads deeper than this are shown as text.
const MAX_DEPTH: usize = 4;

/// Strip a leading "```lang" and a trailing "```" marker.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();

    if let Some(rest) = body.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        body = &rest[tag_len..];
    }

    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }

    body.trim()
}

/// Parse a textual body that may be plain prose or (fenced) JSON.
pub fn parse_text_body(text: &str, source: Source) -> ProviderResponse {
    parse_text_at(text, source, 0)
}

/// Parse the `data` field of a stream `completed` event.
///
/// The expected shape is `{"data": {"result": ...}}` or a top-level
/// `result`. A bare non-object `data` is read as the result itself. Anything
/// else falls back to an empty, degraded response.
pub fn parse_stream_completion(data: &str) -> ProviderResponse {
    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            debug!("Completion payload is not JSON ({}), using empty result", e);
            return ProviderResponse::degraded(Source::A);
        }
    };

    if let Some(result) = value.pointer("/data/result").or_else(|| value.get("result")) {
        if result.is_null() {
            debug!("Completion payload has a null result, using empty result");
            return ProviderResponse::degraded(Source::A);
        }
        return parse_payload_value(result, Source::A);
    }

    match value.get("data") {
        Some(bare) if !bare.is_null() && !bare.is_object() => {
            let response = parse_payload_value(bare, Source::A);
            if response.has_content() {
                response
            } else {
                debug!("Completion data carries nothing to show, using empty result");
                ProviderResponse::degraded(Source::A)
            }
        }
        _ => {
            debug!("Completion payload has no result, using empty result");
            ProviderResponse::degraded(Source::A)
        }
    }
}

/// Interpret an arbitrary JSON value as a provider response.
pub fn parse_payload_value(value: &Value, source: Source) -> ProviderResponse {
    parse_value_at(value, source, 0)
}

fn parse_text_at(text: &str, source: Source, depth: usize) -> ProviderResponse {
    let trimmed = text.trim();
    let fenced = trimmed.starts_with("```");
    let body = strip_code_fence(trimmed);

    if body.is_empty() {
        return ProviderResponse::empty(source);
    }

    let looks_structured = fenced || body.starts_with('{') || body.starts_with('[');
    if !looks_structured || depth >= MAX_DEPTH {
        return ProviderResponse {
            analysis_text: body.to_string(),
            ..ProviderResponse::empty(source)
        };
    }

    match serde_json::from_str::<Value>(body) {
        Ok(value) => parse_value_at(&value, source, depth + 1),
        Err(e) => {
            debug!("Payload from {} is not valid JSON ({}), showing raw text", source, e);
            ProviderResponse {
                analysis_text: body.to_string(),
                degraded: true,
                ..ProviderResponse::empty(source)
            }
        }
    }
}

fn parse_value_at(value: &Value, source: Source, depth: usize) -> ProviderResponse {
    match value {
        Value::Null => ProviderResponse::empty(source),
        Value::String(text) => parse_text_at(text, source, depth),
        Value::Array(items) => ProviderResponse {
            medicines: parse_medicines(items, source),
            ..ProviderResponse::empty(source)
        },
        Value::Object(map) => parse_object(map, source, depth),
        other => ProviderResponse {
            analysis_text: other.to_string(),
            ..ProviderResponse::empty(source)
        },
    }
}

fn parse_object(map: &Map<String, Value>, source: Source, depth: usize) -> ProviderResponse {
    let mut response = ProviderResponse::empty(source);

    if let Some(items) = MEDICINE_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_array))
    {
        response.medicines = parse_medicines(items, source);
    }

    response.severity = map
        .get("severity")
        .and_then(Value::as_str)
        .and_then(Severity::parse);
    response.seek_emergency_care = emergency_flag(map);
    response.location = map.get("location").filter(|v| !v.is_null()).cloned();

    // A nested `analysis` object carries its own severity and text.
    if let Some(Value::Object(nested)) = map.get("analysis") {
        if depth < MAX_DEPTH {
            let inner = parse_object(nested, source, depth + 1);
            fill_missing(&mut response, inner);
        }
    }

    if response.analysis_text.is_empty() {
        for key in TEXT_KEYS {
            match map.get(*key) {
                Some(Value::String(text)) if !text.trim().is_empty() => {
                    let inner = parse_text_at(text, source, depth);
                    fill_missing(&mut response, inner);
                    break;
                }
                Some(Value::Object(_)) if *key == "result" && depth < MAX_DEPTH => {
                    let inner = parse_value_at(&map[*key], source, depth + 1);
                    fill_missing(&mut response, inner);
                    break;
                }
                _ => {}
            }
        }
    }

    response
}

/// Copy fields from `inner` wherever `outer` has nothing.
fn fill_missing(outer: &mut ProviderResponse, inner: ProviderResponse) {
    if outer.medicines.is_empty() {
        outer.medicines = inner.medicines;
    }
    if outer.severity.is_none() {
        outer.severity = inner.severity;
    }
    if outer.analysis_text.is_empty() {
        outer.analysis_text = inner.analysis_text;
    }
    if outer.location.is_none() {
        outer.location = inner.location;
    }
    outer.seek_emergency_care |= inner.seek_emergency_care;
    outer.degraded |= inner.degraded;
}

fn emergency_flag(map: &Map<String, Value>) -> bool {
    ["seekEmergencyCare", "seek_emergency_care"]
        .iter()
        .filter_map(|key| map.get(*key))
        .any(|v| v.as_bool().unwrap_or(false))
}

fn parse_medicines(items: &[Value], source: Source) -> Vec<MedicineRecommendation> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Object(fields) => Some(MedicineRecommendation {
                name: string_field(fields, &["name"]).unwrap_or_default(),
                dosage: string_field(fields, &["dosage", "usage"]),
                description: string_field(fields, &["description"]),
                local_availability: string_field(
                    fields,
                    &["localAvailability", "local_availability"],
                ),
                source,
            }),
            Value::String(name) => Some(MedicineRecommendation {
                name: name.clone(),
                dosage: None,
                description: None,
                local_availability: None,
                source,
            }),
            _ => None,
        })
        .collect()
}

fn string_field(fields: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| fields.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}
