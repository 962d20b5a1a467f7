//! `+---+---+` bordered listings.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{Record, Table};
use crate::error::{ParseError, Result};

static BORDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+(?:[-=]+\+)+$").expect("constant pattern compiles"));

/// A table together with the line printed just above it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledTable {
    pub label: Option<String>,
    pub table: Table,
}

/// Parse the last table in `lines`.
///
/// Multi-line cells are joined with a single space. Text after the table
/// (hints, warnings) is ignored. A table with a header but no rows is
/// returned empty. Output without any table is [`ParseError::NoTable`].
pub fn parse_horizontal<S: AsRef<str>>(lines: &[S]) -> Result<Table> {
    parse_horizontal_with(lines, false)
}

/// Like [`parse_horizontal`], joining continuation lines with `\n` when
/// `preserve_line_breaks` is set.
pub fn parse_horizontal_with<S: AsRef<str>>(lines: &[S], preserve_line_breaks: bool) -> Result<Table> {
    let mut tables = parse_all_horizontal_with(lines, preserve_line_breaks)?;
    tables.pop().map(|t| t.table).ok_or_else(|| ParseError::NoTable.into())
}

/// Parse every table in `lines`, in output order.
///
/// Commands like `openstack server show --debug` or `system
/// application-show` may print several tables, each introduced by a
/// label line.
pub fn parse_all_horizontal<S: AsRef<str>>(lines: &[S]) -> Result<Vec<LabeledTable>> {
    parse_all_horizontal_with(lines, false)
}

fn parse_all_horizontal_with<S: AsRef<str>>(
    lines: &[S],
    preserve_line_breaks: bool,
) -> Result<Vec<LabeledTable>> {
    let joiner = if preserve_line_breaks { "\n" } else { " " };
    let mut tables = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        // `set -x` traces (`+ exit 0`) and stray `|` notes are not tables.
        if !BORDER.is_match(lines[i].as_ref().trim()) {
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        while i < lines.len() && is_table_line(lines[i].as_ref()) {
            i += 1;
        }
        let block: Vec<&str> = lines[start..i].iter().map(|l| l.as_ref().trim()).collect();
        let label = start
            .checked_sub(1)
            .map(|p| lines[p].as_ref().trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        let table = parse_block(&block, start, joiner)?;
        debug!(
            "parsed table with {} columns and {} rows",
            table.headers().len(),
            table.len()
        );
        tables.push(LabeledTable { label, table });
    }

    Ok(tables)
}

fn is_table_line(line: &str) -> bool {
    let line = line.trim();
    line.starts_with('|') || BORDER.is_match(line)
}

/// Parse one contiguous run of table lines; `offset` is the index of the
/// first line in the whole output, for error messages.
fn parse_block(block: &[&str], offset: usize, joiner: &str) -> Result<Table> {
    let layout = Layout::from_border(block[0]).ok_or_else(|| malformed(offset, "bad top border"))?;

    let mut i = 1;
    let mut header_parts: Vec<Vec<String>> = Vec::new();
    loop {
        let Some(line) = block.get(i) else {
            return Err(malformed(offset + i, "header is not followed by a border"));
        };
        if BORDER.is_match(line) {
            break;
        }
        header_parts.push(layout.cells(line).ok_or_else(|| {
            malformed(
                offset + i,
                &format!("header does not have {} cells", layout.columns()),
            )
        })?);
        i += 1;
    }
    if header_parts.is_empty() {
        return Err(malformed(offset + i, "table has no header row"));
    }

    let headers: Vec<String> = (0..layout.columns())
        .map(|c| header_parts.iter().map(|p| p[c].as_str()).collect::<String>())
        .collect();
    let mut table = Table::new(headers);
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut closed = false;

    for (n, line) in block.iter().enumerate().skip(i + 1) {
        if BORDER.is_match(line) {
            closed = true;
            continue;
        }
        let Some(cells) = layout.cells(line) else {
            if closed {
                debug!("table ends at line {}, ignoring what follows", offset + n);
                break;
            }
            return Err(malformed(
                offset + n,
                &format!("row does not have {} cells", layout.columns()),
            ));
        };
        closed = false;
        if cells.iter().all(String::is_empty) {
            continue;
        }
        if cells[0].is_empty() {
            let Some(previous) = rows.last_mut() else {
                return Err(malformed(offset + n, "continuation line before the first row"));
            };
            for (target, cell) in previous.iter_mut().zip(cells) {
                if cell.is_empty() {
                    continue;
                }
                if !target.is_empty() {
                    target.push_str(joiner);
                }
                target.push_str(&cell);
            }
        } else {
            rows.push(cells);
        }
    }
    if !closed {
        warn!("table starting at line {} has no bottom border", offset + 1);
    }

    for cells in rows {
        let record: Record = table.headers().iter().cloned().zip(cells).collect();
        table.push(record);
    }
    Ok(table)
}

/// Column boundaries taken from a border line.
struct Layout {
    /// Char offsets of the `+` separators.
    bounds: Vec<usize>,
}

impl Layout {
    fn from_border(line: &str) -> Option<Self> {
        if !BORDER.is_match(line) {
            return None;
        }
        let bounds = line
            .chars()
            .enumerate()
            .filter(|(_, c)| *c == '+')
            .map(|(i, _)| i)
            .collect();
        Some(Self { bounds })
    }

    fn columns(&self) -> usize {
        self.bounds.len() - 1
    }

    /// Trimmed cells of `line`, or `None` when the cell count is wrong.
    ///
    /// Aligned rows are cut at the border positions so a `|` inside a value
    /// survives; anything else falls back to splitting on `|`.
    fn cells(&self, line: &str) -> Option<Vec<String>> {
        let chars: Vec<char> = line.chars().collect();
        let aligned = chars.len() == self.bounds[self.columns()] + 1
            && self.bounds.iter().all(|&b| chars[b] == '|');
        if aligned {
            let cells = self
                .bounds
                .windows(2)
                .map(|w| chars[w[0] + 1..w[1]].iter().collect::<String>().trim().to_string())
                .collect();
            return Some(cells);
        }

        let inner = line.strip_prefix('|')?.strip_suffix('|')?;
        let cells: Vec<String> = inner.split('|').map(|c| c.trim().to_string()).collect();
        (cells.len() == self.columns()).then_some(cells)
    }
}

fn malformed(index: usize, reason: &str) -> crate::Error {
    ParseError::Malformed {
        reason: reason.to_string(),
        line: index + 1,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ErrorKind};
    use crate::table::fixtures::HOST_LIST;
    use proptest::prelude::*;

    #[test]
    fn test_parse_host_list() {
        let table = parse_horizontal(HOST_LIST).unwrap();

        assert_eq!(
            table.headers(),
            &["id", "hostname", "personality", "administrative", "operational", "availability"]
        );
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[1]["hostname"], "controller-1");
        assert_eq!(table.rows()[2]["availability"], "online");
    }

    #[test]
    fn test_continuation_joined_with_space() {
        let output = [
            "+--------------------------------------+---------+---------------------+",
            "| ID                                   | Name    | Subnets             |",
            "+--------------------------------------+---------+---------------------+",
            "| 0c5bd5a8-0e3f-4b9f-a0b8-3bc1e0a57e3b | tenant1 | 10.0.0.0/24,        |",
            "|                                      |         | 10.0.1.0/24         |",
            "| 5a4d0f6c-96de-4b91-b8cb-4b55a8ae0e8e | ext     | 192.168.1.0/24      |",
            "+--------------------------------------+---------+---------------------+",
        ];

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0]["Subnets"], "10.0.0.0/24, 10.0.1.0/24");

        let preserved = parse_horizontal_with(&output, true).unwrap();
        assert_eq!(preserved.rows()[0]["Subnets"], "10.0.0.0/24,\n10.0.1.0/24");
    }

    #[test]
    fn test_multi_line_header() {
        let output = [
            "+----+------------+",
            "| id | availabili |",
            "|    | ty         |",
            "+----+------------+",
            "| 1  | available  |",
            "+----+------------+",
        ];

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.headers(), &["id", "availability"]);
        assert_eq!(table.rows()[0]["availability"], "available");
    }

    #[test]
    fn test_trailing_hint_ignored() {
        let mut output: Vec<&str> = HOST_LIST.to_vec();
        output.push("Please use 'system host-show <id>' for details");

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_header_only_table_is_empty() {
        let output = [
            "+------+--------+",
            "| uuid | status |",
            "+------+--------+",
            "+------+--------+",
        ];

        let table = parse_horizontal(&output).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.headers(), &["uuid", "status"]);
    }

    #[test]
    fn test_header_without_separator_is_error() {
        let output = ["+----+------+", "| id | name |"];

        let err = parse_horizontal(&output).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_bad_border_is_error() {
        let output = ["+----+------+", "| id | name |", "+----x------+", "| 1  | a    |"];

        assert!(matches!(
            parse_horizontal(&output),
            Err(Error::Parse(ParseError::Malformed { line: 3, .. }))
        ));
    }

    #[test]
    fn test_header_cell_count_mismatch() {
        let output = ["+----+------+", "| id | name | extra |", "+----+------+"];

        assert!(matches!(
            parse_horizontal(&output),
            Err(Error::Parse(ParseError::Malformed { line: 2, .. }))
        ));
    }

    #[test]
    fn test_no_table() {
        let output = ["Error: host not found"];

        assert!(matches!(
            parse_horizontal(&output),
            Err(Error::Parse(ParseError::NoTable))
        ));
    }

    #[test]
    fn test_misaligned_rows_split_on_pipes() {
        let output = ["+----+------+", "| id | name |", "+----+------+", "| 10 | a-very-long-name |", "+----+------+"];

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.rows()[0]["name"], "a-very-long-name");
    }

    #[test]
    fn test_pipe_inside_aligned_cell_kept() {
        let output = ["+----+-------+", "| id | cmd   |", "+----+-------+", "| 1  | a | b |", "+----+-------+"];

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.rows()[0]["cmd"], "a | b");
    }

    #[test]
    fn test_all_tables_with_labels() {
        let output = [
            "Server:",
            "+----+------+",
            "| id | name |",
            "+----+------+",
            "| 1  | vm1  |",
            "+----+------+",
            "",
            "Ports:",
            "+------+",
            "| port |",
            "+------+",
            "| p1   |",
            "| p2   |",
            "+------+",
        ];

        let tables = parse_all_horizontal(&output).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].label.as_deref(), Some("Server:"));
        assert_eq!(tables[1].label.as_deref(), Some("Ports:"));
        assert_eq!(tables[1].table.len(), 2);

        let last = parse_horizontal(&output).unwrap();
        assert_eq!(last, tables[1].table);
    }

    #[test]
    fn test_xtrace_lines_around_table_skipped() {
        let mut output = vec!["+ source /etc/platform/openrc", "+ system host-list"];
        output.extend_from_slice(HOST_LIST);
        output.push("+ exit 0");

        let tables = parse_all_horizontal(&output).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].table.len(), 3);
    }

    #[test]
    fn test_stray_pipe_lines_outside_table_skipped() {
        let mut output = vec!["| note: output truncated |"];
        output.extend_from_slice(HOST_LIST);
        output.push("");
        output.push("| note: use --all for more |");

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[2]["hostname"], "compute-0");
    }

    #[test]
    fn test_note_right_after_bottom_border_ends_table() {
        let mut output: Vec<&str> = HOST_LIST.to_vec();
        output.push("| note: use --all for more |");

        let table = parse_horizontal(&output).unwrap();
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_missing_bottom_border_accepted() {
        let table = parse_horizontal(&HOST_LIST[..HOST_LIST.len() - 1]).unwrap();
        assert_eq!(table.len(), 3);
    }

    fn table_lines(headers: &[String], rows: &[(Vec<String>, Vec<Vec<String>>)]) -> Vec<String> {
        let mut grid: Vec<Vec<String>> = Vec::new();
        for (primary, continuations) in rows {
            grid.push(primary.clone());
            for rest in continuations {
                let mut cells = vec![String::new()];
                cells.extend(rest.iter().cloned());
                grid.push(cells);
            }
        }
        let widths: Vec<usize> = (0..headers.len())
            .map(|c| grid.iter().map(|r| r[c].len()).chain([headers[c].len()]).max().unwrap_or(0))
            .collect();

        let border = widths.iter().fold("+".to_string(), |acc, w| acc + &"-".repeat(w + 2) + "+");
        let row = |cells: &[String]| {
            cells
                .iter()
                .zip(&widths)
                .fold("|".to_string(), |acc, (cell, &w)| acc + &format!(" {cell:<w$} |"))
        };

        let mut output = vec![border.clone(), row(headers), border.clone()];
        output.extend(grid.iter().map(|cells| row(cells)));
        output.push(border);
        output
    }

    fn listing() -> impl Strategy<Value = (Vec<String>, Vec<(Vec<String>, Vec<Vec<String>>)>)> {
        prop::collection::btree_set("[a-z]{1,8}", 1..5).prop_flat_map(|headers| {
            let n = headers.len();
            let row = (
                prop::collection::vec("[a-z0-9]{1,10}", n),
                prop::collection::vec(prop::collection::vec("[a-z0-9]{0,10}", n - 1), 0..3),
            );
            (
                Just(headers.into_iter().collect::<Vec<_>>()),
                prop::collection::vec(row, 0..8),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_continuations_never_become_rows((headers, rows) in listing()) {
            let output = table_lines(&headers, &rows);
            let table = parse_horizontal(&output).unwrap();

            prop_assert_eq!(table.headers(), headers.as_slice());
            prop_assert_eq!(table.len(), rows.len());
            for (record, (primary, _)) in table.rows().iter().zip(&rows) {
                for header in &headers {
                    prop_assert!(record.contains_key(header));
                }
                prop_assert_eq!(&record[headers[0].as_str()], &primary[0]);
            }
        }
    }
}
