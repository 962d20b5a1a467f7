//! Decoding of Python-style literals printed in table cells.
//!
//! The platform CLIs render structured values with Python `repr`:
//! `True`, `None`, `{'key': 'value'}`, `[1, 2]`. [`decode_literal`] looks
//! at the leading character and hands the cell to a dedicated parser; cells
//! are never evaluated.

use indexmap::IndexMap;
use log::warn;
use serde_json::{Number, Value};

use super::Record;
use crate::error::{Result, TableError};

/// Decode one cell into a JSON value.
///
/// - `{...}` / `[...]`: Python dict or list, single quotes allowed
/// - `True`, `False`, `None`: bool / null
/// - integers and floats: number
/// - anything else: the trimmed string
///
/// Lowercase `true`/`false`/`none` are accepted with a warning since the
/// platform itself prints the capitalized forms.
pub fn decode_literal(raw: &str) -> Result<Value> {
    let text = raw.trim();
    match text.chars().next() {
        Some('{') | Some('[') => decode_container(text),
        Some('T') | Some('F') | Some('N') | Some('t') | Some('f') | Some('n') => Ok(decode_word(text)),
        Some(c) if c.is_ascii_digit() || c == '-' => Ok(decode_number(text)),
        _ => Ok(Value::String(text.to_string())),
    }
}

/// Look up `field` in a vertical-table record.
///
/// With `structured`, the cell goes through [`decode_literal`]; otherwise
/// it is returned as a trimmed string.
pub fn value(record: &Record, field: &str, structured: bool) -> Result<Value> {
    let raw = record
        .get(field)
        .ok_or_else(|| TableError::UnknownColumn(field.to_string()))?;
    if structured {
        decode_literal(raw)
    } else {
        Ok(Value::String(raw.trim().to_string()))
    }
}

/// [`value`] for several fields, in `fields` order.
pub fn values<S: AsRef<str>>(record: &Record, fields: &[S], structured: bool) -> Result<Vec<Value>> {
    fields
        .iter()
        .map(|f| value(record, f.as_ref(), structured))
        .collect()
}

/// Decode a `key=value, key2='value2'` cell (or a dict literal) into a map.
///
/// Items without `=` are skipped; surrounding single quotes on values are
/// removed.
pub fn decode_key_values(raw: &str) -> Result<IndexMap<String, String>> {
    let text = raw.trim();
    if text.starts_with('{') {
        let Value::Object(object) = decode_container(text)? else {
            return Err(literal_error(text, "expected a dict"));
        };
        return Ok(object
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect());
    }

    let mut map = IndexMap::new();
    for item in text.split(", ") {
        let Some((key, value)) = item.split_once('=') else {
            continue;
        };
        let value = value.trim();
        let value = value
            .strip_prefix('\'')
            .and_then(|v| v.strip_suffix('\''))
            .unwrap_or(value);
        map.insert(key.trim().to_string(), value.to_string());
    }
    Ok(map)
}

fn decode_word(text: &str) -> Value {
    match text {
        "True" => Value::Bool(true),
        "False" => Value::Bool(false),
        "None" => Value::Null,
        "true" | "false" | "none" | "null" => {
            warn!("ambiguous literal '{}', decoding as {}", text, text.to_ascii_lowercase());
            match text {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => Value::Null,
            }
        }
        _ => Value::String(text.to_string()),
    }
}

fn decode_number(text: &str) -> Value {
    if let Ok(n) = text.parse::<i64>() {
        return Value::Number(n.into());
    }
    text.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .and_then(Number::from_f64)
        .map_or_else(|| Value::String(text.to_string()), Value::Number)
}

fn decode_container(text: &str) -> Result<Value> {
    let json = python_to_json(text)?;
    serde_json::from_str(&json).map_err(|e| literal_error(text, &e.to_string()))
}

/// Rewrite a Python dict/list literal as JSON text.
///
/// Single-quoted strings become double-quoted, `True`/`False`/`None`
/// become `true`/`false`/`null`, and trailing commas are dropped.
fn python_to_json(text: &str) -> Result<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                i = copy_string(&chars, i, &mut out).ok_or_else(|| literal_error(text, "unterminated string"))?;
                continue;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some(']') | Some('}')) {
                    out.push(c);
                }
            }
            '(' | ')' => return Err(literal_error(text, "tuples are not supported")),
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    out.push(chars[i]);
                    i += 1;
                }
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                // u'...' and b'...' prefixes
                if matches!(word.as_str(), "u" | "b") && matches!(chars.get(i), Some('\'') | Some('"')) {
                    continue;
                }
                match decode_word(&word) {
                    Value::Bool(b) => out.push_str(if b { "true" } else { "false" }),
                    Value::Null => out.push_str("null"),
                    _ => return Err(literal_error(text, &format!("bare word '{word}'"))),
                }
                continue;
            }
            _ => out.push(c),
        }
        i += 1;
    }
    Ok(out)
}

/// Copy the quoted string starting at `chars[start]` to `out` as a JSON
/// string. Returns the index after the closing quote.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> Option<usize> {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = *chars.get(i + 1)?;
                match escaped {
                    '\'' => out.push('\''),
                    '"' => out.push_str("\\\""),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                i += 2;
                continue;
            }
            c if c == quote => {
                out.push('"');
                return Some(i + 1);
            }
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
        i += 1;
    }
    None
}

fn literal_error(value: &str, reason: &str) -> crate::Error {
    TableError::Literal {
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
