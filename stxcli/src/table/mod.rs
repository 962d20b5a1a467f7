//! Parsers for the platform's CLI table formats and helpers over the result.
//!
//! Three output shapes are handled:
//!
//! - [`parse_horizontal`]: `+---+` bordered listings (`system host-list`),
//!   one [`Record`] per row.
//! - [`parse_vertical`]: two-column `Property | Value` tables (`system
//!   host-show`), one [`Record`] keyed by property.
//! - [`parse_kube`]: whitespace-aligned `kubectl get` output.
//!
//! Cell values stay strings. [`literal`] turns the Python-ish tokens the
//! platform prints (`True`, `None`, `{'a': 1}`) into JSON values when the
//! caller asks for it.
//!
//! # Example
//!
//! ```
//! use stxcli::table::{self, FilterOptions};
//!
//! let output = [
//!     "+----+--------------+-------------+",
//!     "| id | hostname     | personality |",
//!     "+----+--------------+-------------+",
//!     "| 1  | controller-0 | controller  |",
//!     "| 2  | compute-0    | worker      |",
//!     "+----+--------------+-------------+",
//! ];
//! let hosts = table::parse_horizontal(&output)?;
//! let workers = table::filter(&hosts, &[("personality", &["worker"])], FilterOptions::default())?;
//! assert_eq!(table::column(&workers, "hostname")?, vec!["compute-0"]);
//! # Ok::<(), stxcli::Error>(())
//! ```

mod filter;
mod horizontal;
mod kube;
pub mod literal;
mod vertical;

use indexmap::IndexMap;
use serde::Serialize;

pub use filter::{FilterOptions, as_dict, column, columns, filter, group_by, remove_columns};
pub use horizontal::{LabeledTable, parse_all_horizontal, parse_horizontal, parse_horizontal_with};
pub use kube::{parse_all_kube, parse_kube};
pub use literal::{decode_key_values, decode_literal, value, values};
pub use vertical::{parse_vertical, parse_vertical_with_labels};

/// One row of a horizontal table, or a whole vertical table.
///
/// Keys keep the header text verbatim and iterate in column order.
pub type Record = IndexMap<String, String>;

/// A parsed horizontal table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Record>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    /// Column names in display order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.rows.iter()
    }

    pub fn into_rows(self) -> Vec<Record> {
        self.rows
    }

    /// Append a row. Missing columns are filled with empty cells.
    pub fn push(&mut self, mut row: Record) {
        for header in &self.headers {
            row.entry(header.clone()).or_default();
        }
        self.rows.push(row);
    }

    pub(crate) fn with_rows(&self, rows: Vec<Record>) -> Self {
        Self {
            headers: self.headers.clone(),
            rows,
        }
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}
