//! JSON stringifier.
//!
//! Produces a heap-owned string sized to the encoded document. Control
//! characters `U+0000..U+001F` are emitted as `\uXXXX` (with the usual short
//! escapes for the common ones); everything else passes through as UTF-8.

use crate::value::Value;

/// Encodes `value` as compact JSON.
#[must_use]
pub fn stringify(value: &Value<'_>) -> String {
    let mut out = String::with_capacity(64);
    write_value(&mut out, value);
    out
}

fn write_value(out: &mut String, value: &Value<'_>) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => write_number(out, *n),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(members) => {
            out.push('{');
            for (i, (key, member)) in members.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, member);
            }
            out.push('}');
        }
    }
}

/// Integral values in the exactly-representable range print without a
/// fractional part, so `parse` → `stringify` is stable for them.
fn write_number(out: &mut String, n: f64) {
    use std::fmt::Write;

    if !n.is_finite() {
        // JSON has no NaN/Infinity; encode as null rather than corrupt the
        // document.
        out.push_str("null");
        return;
    }
    const EXACT_INT_BOUND: f64 = 9_007_199_254_740_992.0; // 2^53
    if n.fract() == 0.0 && n.abs() < EXACT_INT_BOUND {
        let _ = write!(out, "{}", n as i64);
    } else {
        let _ = write!(out, "{n}");
    }
}

/// Quotes and escapes `s` as a standalone JSON string literal.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    write_string(&mut out, s);
    out
}

pub(crate) fn write_string(out: &mut String, s: &str) {
    use std::fmt::Write;

    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use mcpd_memory::Arena;

    #[test]
    fn scalars() {
        assert_eq!(stringify(&Value::Null), "null");
        assert_eq!(stringify(&Value::Bool(true)), "true");
        assert_eq!(stringify(&Value::Number(42.0)), "42");
        assert_eq!(stringify(&Value::Number(-2.5)), "-2.5");
        assert_eq!(stringify(&Value::String("hi")), "\"hi\"");
    }

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(
            stringify(&Value::String("a\nb\u{0001}c")),
            "\"a\\nb\\u0001c\""
        );
        assert_eq!(stringify(&Value::String("q\"w\\e")), r#""q\"w\\e""#);
    }

    #[test]
    fn non_finite_numbers_encode_as_null() {
        assert_eq!(stringify(&Value::Number(f64::NAN)), "null");
        assert_eq!(stringify(&Value::Number(f64::INFINITY)), "null");
    }

    #[test]
    fn canonical_documents_round_trip() {
        let arena = Arena::default();
        for doc in [
            r#"{"jsonrpc":"2.0","id":1,"result":"pong"}"#,
            r#"{"a":[1,2,3],"b":{"c":null,"d":false}}"#,
            r#"[]"#,
            r#"{}"#,
            r#"[1.5,-3,"x"]"#,
            r#"{"nested":{"deep":[{"leaf":true}]}}"#,
        ] {
            let value = parse(&arena, doc.as_bytes()).unwrap();
            assert_eq!(stringify(value), doc, "round-trip mismatch for {doc}");
        }
    }

    #[test]
    fn object_member_order_is_preserved() {
        let arena = Arena::default();
        let doc = r#"{"z":1,"a":2,"m":3}"#;
        let value = parse(&arena, doc.as_bytes()).unwrap();
        assert_eq!(stringify(value), doc);
    }
}
