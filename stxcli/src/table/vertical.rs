//! Two-column `Property | Value` tables.

use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use super::Record;
use crate::error::{ParseError, Result};

static BORDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+-+\+-+\+$").expect("constant pattern compiles"));

/// Top border, header, separator, one row, bottom border.
const MIN_LINES: usize = 5;

/// Parse a `system ...-show` style table into a property map.
///
/// Values are returned as printed; a value wrapped over several lines is
/// joined with single spaces. See [`value`](super::value) for decoding
/// `True`/`None`/dict literals.
pub fn parse_vertical<S: AsRef<str>>(lines: &[S]) -> Result<Record> {
    parse_vertical_with_labels(lines, "Property", "Value")
}

/// Parse a vertical table whose header reads `key_label | value_label`
/// (`openstack ... show` prints `Field | Value`).
pub fn parse_vertical_with_labels<S: AsRef<str>>(
    lines: &[S],
    key_label: &str,
    value_label: &str,
) -> Result<Record> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref().trim()).collect();
    // Preamble such as the echoed command or `set -x` traces (`+ source
    // /etc/platform/openrc`) is skipped up to the first real border.
    let start = lines.iter().position(|l| BORDER.is_match(l)).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(0, |i| i + 1);
    let body = lines.get(start..end).unwrap_or_default();

    if body.len() < MIN_LINES {
        return Err(ParseError::TooShort {
            min: MIN_LINES,
            found: body.len(),
        }
        .into());
    }

    check_border(body[0], start)?;
    let (key, value) = split_row(body[1], start + 1)?;
    if key != key_label || value != value_label {
        return Err(ParseError::BadHeader {
            expected: format!("{key_label} | {value_label}"),
            found: format!("{key} | {value}"),
        }
        .into());
    }
    check_border(body[2], start + 2)?;

    let mut record = Record::new();
    let mut last_key: Option<String> = None;
    let mut closed = false;

    for (n, line) in body.iter().enumerate().skip(3) {
        let index = start + n;
        if BORDER.is_match(line) {
            closed = true;
            break;
        }
        if !line.starts_with('|') {
            break;
        }
        let (key, value) = split_row(line, index)?;
        if key.is_empty() {
            let Some(previous) = last_key.as_ref().and_then(|k| record.get_mut(k)) else {
                return Err(malformed(index, "empty property name in the first row"));
            };
            if !value.is_empty() {
                if !previous.is_empty() {
                    previous.push(' ');
                }
                previous.push_str(value);
            }
            continue;
        }
        if record.contains_key(key) {
            warn!("property '{}' repeated at line {}, keeping the last value", key, index + 1);
        }
        record.insert(key.to_string(), value.to_string());
        last_key = Some(key.to_string());
    }

    if !closed {
        return Err(malformed(start + body.len() - 1, "missing bottom border"));
    }
    if record.is_empty() {
        return Err(malformed(start + 3, "table has no rows"));
    }
    Ok(record)
}

/// Split `| key | value |` at the first two bars and the last one.
fn split_row(line: &str, index: usize) -> Result<(&str, &str)> {
    let inner = line
        .strip_prefix('|')
        .and_then(|l| l.strip_suffix('|'))
        .ok_or_else(|| malformed(index, "row is not enclosed in '|'"))?;
    let (key, value) = inner
        .split_once('|')
        .ok_or_else(|| malformed(index, "row does not have two cells"))?;
    Ok((key.trim(), value.trim()))
}

fn check_border(line: &str, index: usize) -> Result<()> {
    if BORDER.is_match(line) {
        Ok(())
    } else {
        Err(malformed(index, "bad border line"))
    }
}

fn malformed(index: usize, reason: &str) -> crate::Error {
    ParseError::Malformed {
        reason: reason.to_string(),
        line: index + 1,
    }
    .into()
}
