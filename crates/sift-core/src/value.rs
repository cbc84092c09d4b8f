//! Record keys, bucket keys and the JavaScript-flavoured coercions the
//! index applies to field values.

use crate::error::{Result, SiftError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

// 2^63; integral floats in [-2^63, 2^63) fit an i64 exactly
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

/// Identifier of a record, as stored in index buckets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum PrimaryKey {
    Int(i64),
    Str(String),
}

impl PrimaryKey {
    /// Resolve a key from a JSON value; `null` has no key.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::Null => None,
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => Some(Self::Int(i)),
                // 5.0 and 5 are the same id
                (None, Some(f)) if f.fract() == 0.0 && (-I64_BOUND..I64_BOUND).contains(&f) => {
                    Some(Self::Int(f as i64))
                }
                _ => Some(Self::Str(number_string(n))),
            },
            Value::String(s) => Some(Self::Str(s.clone())),
            other => Some(Self::Str(js_string(other))),
        }
    }

    /// Parse user input: integers become `Int`, everything else `Str`.
    pub fn parse(s: &str) -> Self {
        match s.parse::<i64>() {
            Ok(i) => Self::Int(i),
            Err(_) => Self::Str(s.to_string()),
        }
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for PrimaryKey {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for PrimaryKey {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<i64> for PrimaryKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

/// Bucket key inside one indexed field.
///
/// The three absence states are tagged variants rather than magic strings,
/// so a record whose value is literally `"__NULL__"` lands in a `Value`
/// bucket and never collides with a real null. Variant order puts the
/// absence buckets first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndexKey {
    Null,
    Undefined,
    Empty,
    Value(String),
}

impl IndexKey {
    /// Normalize a resolved field value; `None` means the path was missing.
    pub fn from_resolved(v: Option<&Value>) -> Self {
        match v {
            None => Self::Undefined,
            Some(Value::Null) => Self::Null,
            Some(other) => {
                let s = js_string(other);
                if s.is_empty() {
                    Self::Empty
                } else {
                    Self::Value(s)
                }
            }
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, Self::Value(_))
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(s) => Some(s),
            _ => None,
        }
    }

    /// `+key`; absence buckets are never numeric.
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Value(s) => js_to_number(s),
            _ => f64::NAN,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("__NULL__"),
            Self::Undefined => f.write_str("__UNDEFINED__"),
            Self::Empty => f.write_str("__EMPTY__"),
            Self::Value(s) => f.write_str(s),
        }
    }
}

/// Walk `path` (dot separated) through objects and arrays.
pub fn get_value_at_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(record, |cur, seg| match cur {
        Value::Object(map) => map.get(seg),
        Value::Array(items) => seg.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at `path`, creating intermediate objects as needed.
pub fn set_value_at_path(record: &mut Value, path: &str, value: Value) -> Result<()> {
    let mut segments = path.split('.').peekable();
    let mut cur = record;
    while let Some(seg) = segments.next() {
        if cur.is_null() {
            *cur = Value::Object(Map::new());
        }
        let map = cur.as_object_mut().ok_or_else(|| {
            SiftError::Validation(format!("cannot write '{path}': '{seg}' has a non-object parent"))
        })?;
        if segments.peek().is_none() {
            map.insert(seg.to_string(), value);
            return Ok(());
        }
        cur = map
            .entry(seg.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Err(SiftError::Validation("empty field path".into()))
}

/// String form of a value, matching `String(v)` in the browser.
pub fn js_string(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => number_string(n),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => js_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

fn number_string(n: &serde_json::Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e21 => format!("{f:.0}"),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Unary `+` on a string.
pub fn js_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = t.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|v| v as f64)
                .unwrap_or(f64::NAN);
        }
    }
    // f64::from_str also takes "inf" and "nan", which `+` does not
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Unary `+` on a filter operand.
pub fn value_to_number(v: &Value) -> f64 {
    match v {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => js_to_number(s),
        Value::Array(_) => js_to_number(&js_string(v)),
        Value::Object(_) => f64::NAN,
    }
}
