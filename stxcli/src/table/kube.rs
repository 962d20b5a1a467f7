//! Whitespace-aligned `kubectl get` listings.

use log::debug;

use super::{Record, Table};
use crate::error::{ParseError, Result};

/// Parse `kubectl get ...` output.
///
/// The header is the first line holding a double space; a column starts
/// wherever a header word follows two or more spaces, and row cells are
/// cut at those offsets. `No resources found` yields an empty table.
pub fn parse_kube<S: AsRef<str>>(lines: &[S]) -> Result<Table> {
    let lines: Vec<&str> = lines.iter().map(|l| l.as_ref().trim_end()).collect();
    let Some(header_at) = lines.iter().position(|l| l.contains("  ")) else {
        if lines.iter().any(|l| l.starts_with("No resources found")) {
            return Ok(Table::default());
        }
        // A single-column listing has no double space; take the first word.
        return match lines.iter().position(|l| !l.trim().is_empty()) {
            Some(at) if !lines[at].trim().contains(' ') => single_column(&lines[at..]),
            _ => Err(ParseError::NoTable.into()),
        };
    };
    let header = lines[header_at];

    let starts = column_starts(header);
    let columns: Vec<String> = cut(header, &starts);
    let mut table = Table::new(columns.clone());

    for line in &lines[header_at + 1..] {
        if line.trim().is_empty() {
            continue;
        }
        let cells = cut(line, &starts);
        if cells[0].is_empty()
            && let Some(previous) = table.rows.last_mut()
        {
            for (target, cell) in previous.values_mut().zip(cells) {
                if !cell.is_empty() {
                    target.push(' ');
                    target.push_str(&cell);
                }
            }
            continue;
        }
        let record: Record = columns.iter().cloned().zip(cells).collect();
        table.rows.push(record);
    }

    debug!("parsed kube table with {} rows", table.len());
    Ok(table)
}

/// Parse several `kubectl` listings separated by blank lines
/// (`kubectl get pods,svc`).
pub fn parse_all_kube<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Table>> {
    lines
        .split(|l| l.as_ref().trim().is_empty())
        .filter(|block| !block.is_empty())
        .map(parse_kube)
        .collect()
}

fn single_column(lines: &[&str]) -> Result<Table> {
    let name = lines[0].trim().to_string();
    let mut table = Table::new(vec![name.clone()]);
    for line in &lines[1..] {
        let cell = line.trim();
        if !cell.is_empty() {
            table.rows.push(Record::from([(name.clone(), cell.to_string())]));
        }
    }
    Ok(table)
}

/// Char offsets where columns begin.
fn column_starts(header: &str) -> Vec<usize> {
    let chars: Vec<char> = header.chars().collect();
    let mut starts = vec![0];
    for i in 2..chars.len() {
        if !chars[i].is_whitespace() && chars[i - 1].is_whitespace() && chars[i - 2].is_whitespace() {
            starts.push(i);
        }
    }
    starts
}

fn cut(line: &str, starts: &[usize]) -> Vec<String> {
    let chars: Vec<char> = line.chars().collect();
    starts
        .iter()
        .enumerate()
        .map(|(n, &from)| {
            let to = starts.get(n + 1).copied().unwrap_or(chars.len()).min(chars.len());
            let from = from.min(to);
            chars[from..to].iter().collect::<String>().trim().to_string()
        })
        .collect()
}
