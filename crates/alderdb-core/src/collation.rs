//! The key codec: canonical serialization of JSON view keys and the three
//! total orders a view can collate under.
//!
//! Keys are full JSON values. `Unicode` is the CouchDB-compatible JSON
//! collation; `Ascii` is the same structural order with raw byte string
//! comparison; `Raw` compares the serialized bytes directly.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{Error, JsonValue};

/// The total order a view's index is sorted under.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Collation {
    /// CouchDB-compatible JSON collation. Types order
    /// `null < false < true < numbers < strings < arrays < objects`; strings
    /// compare by Unicode code point, case-sensitively and without any
    /// language tailoring.
    #[default]
    Unicode,
    /// The same structural order as [`Collation::Unicode`], but strings
    /// compare by raw byte order.
    Ascii,
    /// Compares the canonical serialized JSON bytes directly.
    Raw,
}

impl Collation {
    /// Compares two keys under this collation, producing a total order.
    #[must_use]
    pub fn compare(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        match self {
            Self::Unicode => collate(a, b, compare_strings_unicode),
            Self::Ascii => collate(a, b, compare_strings_ascii),
            Self::Raw => encode_key_lossy(a).cmp(&encode_key_lossy(b)),
        }
    }
}

/// Serializes a key to its canonical JSON byte string. Object members keep
/// their insertion order; the same value always produces the same bytes.
pub fn encode_key(key: &JsonValue) -> Result<Vec<u8>, Error> {
    serde_json::to_vec(key).map_err(Error::from)
}

fn encode_key_lossy(key: &JsonValue) -> Vec<u8> {
    // Serializing an in-memory JSON value cannot fail.
    serde_json::to_vec(key).unwrap_or_default()
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Bool(false) => 1,
        JsonValue::Bool(true) => 2,
        JsonValue::Number(_) => 3,
        JsonValue::String(_) => 4,
        JsonValue::Array(_) => 5,
        JsonValue::Object(_) => 6,
    }
}

fn collate(a: &JsonValue, b: &JsonValue, strings: fn(&str, &str) -> Ordering) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (JsonValue::Number(a), JsonValue::Number(b)) => compare_numbers(a, b),
        (JsonValue::String(a), JsonValue::String(b)) => strings(a, b),
        (JsonValue::Array(a), JsonValue::Array(b)) => {
            for (a, b) in a.iter().zip(b.iter()) {
                let element = collate(a, b, strings);
                if element != Ordering::Equal {
                    return element;
                }
            }
            a.len().cmp(&b.len())
        }
        (JsonValue::Object(a), JsonValue::Object(b)) => {
            // Objects compare by their (key, value) pairs in insertion order.
            for ((ak, av), (bk, bv)) in a.iter().zip(b.iter()) {
                let key = strings(ak, bk);
                if key != Ordering::Equal {
                    return key;
                }
                let value = collate(av, bv, strings);
                if value != Ordering::Equal {
                    return value;
                }
            }
            a.len().cmp(&b.len())
        }
        _ => Ordering::Equal,
    }
}

fn compare_numbers(a: &serde_json::Number, b: &serde_json::Number) -> Ordering {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a.cmp(&b);
    }
    let a = a.as_f64().unwrap_or_default();
    let b = b.as_f64().unwrap_or_default();
    // JSON cannot encode NaN, so a partial comparison is always conclusive.
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

fn compare_strings_unicode(a: &str, b: &str) -> Ordering {
    a.chars().cmp(b.chars())
}

fn compare_strings_ascii(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

/// Transforms an upper-bound key into the supremum of every key that shares
/// its prefix to `depth` levels.
///
/// A string gains a trailing U+FFFF. An array at depth 1 gains a trailing
/// empty object, which sorts above every non-object element; at deeper
/// depths the transformation recurses into the final element. Any other key
/// is returned unchanged.
#[must_use]
pub fn key_for_prefix_match(key: JsonValue, depth: u32) -> JsonValue {
    if depth < 1 {
        return key;
    }
    match key {
        JsonValue::String(mut string) => {
            string.push('\u{ffff}');
            JsonValue::String(string)
        }
        JsonValue::Array(mut elements) => {
            if depth == 1 {
                elements.push(JsonValue::Object(serde_json::Map::new()));
            } else if let Some(last) = elements.pop() {
                elements.push(key_for_prefix_match(last, depth - 1));
            }
            JsonValue::Array(elements)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assert_sorts_before(collation: Collation, a: JsonValue, b: JsonValue) {
        assert_eq!(
            collation.compare(&a, &b),
            Ordering::Less,
            "{a} should sort before {b} under {collation:?}"
        );
        assert_eq!(collation.compare(&b, &a), Ordering::Greater);
    }

    #[test]
    fn unicode_type_precedence() {
        let ordered = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1),
            json!(0),
            json!(1.5),
            json!(10),
            json!(""),
            json!("A\u{e9}"),
            json!("a"),
            json!([]),
            json!(["a"]),
            json!(["a", "b"]),
            json!(["b"]),
            json!({}),
            json!({"a": 1}),
        ];
        for pair in ordered.windows(2) {
            assert_sorts_before(Collation::Unicode, pair[0].clone(), pair[1].clone());
        }
    }

    #[test]
    fn shorter_array_sorts_first() {
        assert_sorts_before(Collation::Unicode, json!(["a"]), json!(["a", null]));
    }

    #[test]
    fn raw_compares_serialized_bytes() {
        // Numerically 9 < 10, but the serialized text "10" precedes "9".
        assert_sorts_before(Collation::Unicode, json!(9), json!(10));
        assert_sorts_before(Collation::Raw, json!(10), json!(9));
    }

    #[test]
    fn object_order_is_preserved_in_encoding() {
        let key: JsonValue = serde_json::from_str(r#"{"b":1,"a":2}"#).unwrap();
        assert_eq!(encode_key(&key).unwrap(), br#"{"b":1,"a":2}"#.to_vec());
    }

    #[test]
    fn prefix_match_string_appends_max_char() {
        let upper = key_for_prefix_match(json!("US"), 1);
        assert_eq!(upper, json!("US\u{ffff}"));
        assert_sorts_before(Collation::Unicode, json!("USA"), upper);
    }

    #[test]
    fn prefix_match_array_appends_sentinel() {
        let upper = key_for_prefix_match(json!(["US"]), 1);
        assert_eq!(upper, json!(["US", {}]));
        assert_sorts_before(Collation::Unicode, json!(["US", "NY", "NYC"]), upper.clone());
        assert_sorts_before(Collation::Unicode, upper, json!(["UT"]));
    }

    #[test]
    fn prefix_match_recurses_into_last_element() {
        let upper = key_for_prefix_match(json!(["US", "CA"]), 2);
        assert_eq!(upper, json!(["US", "CA\u{ffff}"]));
    }

    #[test]
    fn prefix_match_leaves_other_types_alone() {
        assert_eq!(key_for_prefix_match(json!(7), 3), json!(7));
        assert_eq!(key_for_prefix_match(json!("x"), 0), json!("x"));
    }
}
