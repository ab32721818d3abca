//! Safe serialisation of upstream message envelopes.
//!
//! The upstream protocol hands us trees containing values that have no
//! plain-JSON shape: key material as byte arrays, foreign buffer handles,
//! and (in nested contexts) callable values. Everything persisted or fanned
//! out to webhooks goes through [`safe_serialize`], which substitutes each
//! of those with a stable, schema-bearing marker object. The function is
//! total — a malformed tree degrades to a fallback object, never an error.

use {
    base64::Engine as _,
    base64::engine::general_purpose::STANDARD as BASE64,
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
};

/// Maximum tree depth before the remainder is collapsed into the fallback.
const MAX_DEPTH: usize = 64;

/// A raw upstream value as delivered by the chat transport, before
/// sanitisation. Mirrors the envelope shapes the upstream library produces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// An upstream byte array (media keys, thumbnails, signatures).
    Bytes(Vec<u8>),
    /// A foreign buffer handle from the upstream runtime.
    Buffer(Vec<u8>),
    /// A callable embedded in a nested context; only the name survives.
    Function { name: String },
    /// A non-plain complex object; only its display form survives.
    Opaque { display: String },
    Array(Vec<RawValue>),
    Object(Vec<(String, RawValue)>),
}

impl RawValue {
    /// Convenience constructor for object trees in tests and adapters.
    pub fn object(entries: impl IntoIterator<Item = (&'static str, RawValue)>) -> Self {
        Self::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

/// Sanitise a raw upstream tree into plain JSON.
///
/// Substitutions: byte arrays become `{__type: "bytes", data: <base64>}`,
/// buffers `{__type: "buffer", data: <base64>}`, functions
/// `{__type: "function", name}`, opaque objects `{__type: "opaque",
/// toString}`. Trees deeper than [`MAX_DEPTH`] collapse into the
/// serialisation-error fallback at the point of overflow.
pub fn safe_serialize(raw: &RawValue) -> Value {
    sanitize_node(raw, 0)
}

/// The fallback object stored when an envelope cannot be serialised.
pub fn serialization_error_fallback(reason: &str) -> Value {
    json!({
        "__serialization_error": true,
        "reason": reason,
    })
}

impl RawValue {
    /// Lift a JSON tree received from the upstream bridge into a raw tree.
    ///
    /// The bridge serialises foreign buffers the way the upstream runtime
    /// does (`{"type": "Buffer", "data": [..]}`); those are recognised and
    /// lifted into [`RawValue::Buffer`] so sanitisation re-encodes them as
    /// tagged base64 instead of integer arrays.
    pub fn from_upstream_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_upstream_json).collect())
            },
            Value::Object(map) => {
                if let Some(bytes) = buffer_shape(map) {
                    return Self::Buffer(bytes);
                }
                Self::Object(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::from_upstream_json(v)))
                        .collect(),
                )
            },
        }
    }
}

/// Recognise the upstream runtime's `{"type": "Buffer", "data": [..]}` shape.
fn buffer_shape(map: &serde_json::Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 2 || map.get("type").and_then(Value::as_str) != Some("Buffer") {
        return None;
    }
    let data = map.get("data")?.as_array()?;
    data.iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

fn sanitize_node(raw: &RawValue, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return serialization_error_fallback("max depth exceeded");
    }

    match raw {
        RawValue::Null => Value::Null,
        RawValue::Bool(b) => Value::Bool(*b),
        RawValue::Number(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or_else(|| serialization_error_fallback("non-finite number")),
        RawValue::String(s) => Value::String(s.clone()),
        RawValue::Bytes(data) => json!({
            "__type": "bytes",
            "data": BASE64.encode(data),
        }),
        RawValue::Buffer(data) => json!({
            "__type": "buffer",
            "data": BASE64.encode(data),
        }),
        RawValue::Function { name } => json!({
            "__type": "function",
            "name": name,
        }),
        RawValue::Opaque { display } => json!({
            "__type": "opaque",
            "toString": display,
        }),
        RawValue::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_node(item, depth + 1))
                .collect(),
        ),
        RawValue::Object(entries) => {
            let mut map = serde_json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(key.clone(), sanitize_node(value, depth + 1));
            }
            Value::Object(map)
        },
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_values_pass_through() {
        let raw = RawValue::object([
            ("text", RawValue::String("hello".into())),
            ("count", RawValue::Number(3.0)),
            ("read", RawValue::Bool(false)),
            ("gap", RawValue::Null),
        ]);
        let value = safe_serialize(&raw);
        assert_eq!(value["text"], "hello");
        assert_eq!(value["count"], 3.0);
        assert_eq!(value["read"], false);
        assert!(value["gap"].is_null());
    }

    #[test]
    fn bytes_become_tagged_base64() {
        let value = safe_serialize(&RawValue::Bytes(vec![1, 2, 3]));
        assert_eq!(value["__type"], "bytes");
        assert_eq!(value["data"], BASE64.encode([1u8, 2, 3]));
    }

    #[test]
    fn buffers_and_functions_are_tagged() {
        let raw = RawValue::object([
            ("media_key", RawValue::Buffer(vec![0xde, 0xad])),
            (
                "validate",
                RawValue::Function {
                    name: "validate".into(),
                },
            ),
        ]);
        let value = safe_serialize(&raw);
        assert_eq!(value["media_key"]["__type"], "buffer");
        assert_eq!(value["validate"]["__type"], "function");
        assert_eq!(value["validate"]["name"], "validate");
    }

    #[test]
    fn opaque_keeps_display_form() {
        let value = safe_serialize(&RawValue::Opaque {
            display: "[SessionRecord]".into(),
        });
        assert_eq!(value["__type"], "opaque");
        assert_eq!(value["toString"], "[SessionRecord]");
    }

    #[test]
    fn nested_trees_round_trip_through_json() {
        let raw = RawValue::object([(
            "message",
            RawValue::object([
                ("body", RawValue::String("hi".into())),
                (
                    "attachments",
                    RawValue::Array(vec![RawValue::Bytes(vec![9, 9])]),
                ),
            ]),
        )]);
        let value = safe_serialize(&raw);
        // Storing and re-parsing must preserve the declared shape.
        let stored = serde_json::to_string(&value).unwrap();
        let parsed: Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(parsed["message"]["attachments"][0]["__type"], "bytes");
    }

    #[test]
    fn depth_overflow_degrades_to_fallback() {
        let mut raw = RawValue::String("leaf".into());
        for _ in 0..(MAX_DEPTH + 10) {
            raw = RawValue::Array(vec![raw]);
        }
        let mut value = &safe_serialize(&raw);
        // Walk until we hit the collapsed node; it must be the fallback.
        while let Some(inner) = value.get(0) {
            value = inner;
        }
        assert_eq!(value["__serialization_error"], true);
    }

    #[test]
    fn non_finite_numbers_do_not_panic() {
        let value = safe_serialize(&RawValue::Number(f64::NAN));
        assert_eq!(value["__serialization_error"], true);
    }

    #[test]
    fn upstream_buffer_shape_is_lifted() {
        let raw = RawValue::from_upstream_json(&json!({
            "key": {"type": "Buffer", "data": [1, 2, 255]},
            "body": "hi",
        }));
        let value = safe_serialize(&raw);
        assert_eq!(value["key"]["__type"], "buffer");
        assert_eq!(value["key"]["data"], BASE64.encode([1u8, 2, 255]));
        assert_eq!(value["body"], "hi");
    }

    #[test]
    fn lookalike_buffer_objects_stay_plain() {
        // Three keys, or non-byte data, must not be treated as a buffer.
        let raw = RawValue::from_upstream_json(&json!({
            "type": "Buffer", "data": [1, 2], "extra": true,
        }));
        let value = safe_serialize(&raw);
        assert_eq!(value["type"], "Buffer");
        assert_eq!(value["extra"], true);
    }
}
