//! Row filters and column projections over a [`Table`].

use indexmap::IndexMap;
use log::debug;
use regex::{Regex, RegexBuilder};

use super::{Record, Table};
use crate::error::{Result, TableError};

/// How [`filter`] compares cells with the expected values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    /// Whole-cell match; substring match when false.
    pub strict: bool,

    /// Treat expected values as regular expressions.
    pub regex: bool,

    /// Keep the rows that do *not* match.
    pub exclude: bool,

    pub ignore_case: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            strict: true,
            regex: false,
            exclude: false,
            ignore_case: false,
        }
    }
}

impl FilterOptions {
    pub fn substring(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn regex(mut self) -> Self {
        self.regex = true;
        self
    }

    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn ignore_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

enum Matcher {
    Text(Vec<String>),
    Pattern(Vec<Regex>),
}

impl Matcher {
    fn new<E: AsRef<str>>(expected: &[E], options: FilterOptions) -> Result<Self> {
        if options.regex {
            let patterns = expected
                .iter()
                .map(|e| {
                    let source = if options.strict {
                        format!("^(?:{})$", e.as_ref())
                    } else {
                        e.as_ref().to_string()
                    };
                    RegexBuilder::new(&source)
                        .case_insensitive(options.ignore_case)
                        .build()
                        .map_err(TableError::InvalidPattern)
                })
                .collect::<std::result::Result<_, _>>()?;
            return Ok(Matcher::Pattern(patterns));
        }
        let fold = |s: &str| {
            let s = s.trim();
            if options.ignore_case { s.to_lowercase() } else { s.to_string() }
        };
        Ok(Matcher::Text(expected.iter().map(|e| fold(e.as_ref())).collect()))
    }

    fn matches(&self, cell: &str, options: FilterOptions) -> bool {
        match self {
            Matcher::Pattern(patterns) => patterns.iter().any(|p| p.is_match(cell)),
            Matcher::Text(expected) => {
                let cell = if options.ignore_case { cell.to_lowercase() } else { cell.to_string() };
                expected.iter().any(|e| {
                    if options.strict { cell == *e } else { cell.contains(e.as_str()) }
                })
            }
        }
    }
}

/// Keep the rows whose cells match every predicate.
///
/// Each predicate is a column and its accepted values; a cell matches when
/// it matches any of them. With `exclude` the selection is inverted.
pub fn filter<F, V, E>(table: &Table, predicates: &[(F, V)], options: FilterOptions) -> Result<Table>
where
    F: AsRef<str>,
    V: AsRef<[E]>,
    E: AsRef<str>,
{
    let matchers = predicates
        .iter()
        .map(|(field, expected)| {
            let field = field.as_ref();
            require_column(table, field)?;
            Ok((field, Matcher::new(expected.as_ref(), options)?))
        })
        .collect::<Result<Vec<_>>>()?;

    let rows: Vec<Record> = table
        .iter()
        .filter(|row| {
            let hit = matchers
                .iter()
                .all(|(field, m)| m.matches(row.get(*field).map_or("", String::as_str), options));
            hit != options.exclude
        })
        .cloned()
        .collect();

    debug!("filter kept {} of {} rows", rows.len(), table.len());
    Ok(table.with_rows(rows))
}

/// All values of one column, in row order.
pub fn column<'a>(table: &'a Table, name: &str) -> Result<Vec<&'a str>> {
    require_column(table, name)?;
    Ok(table
        .iter()
        .map(|row| row.get(name).map_or("", String::as_str))
        .collect())
}

/// Several columns at once: one entry per row, holding the requested
/// cells in `names` order.
pub fn columns<'a, S: AsRef<str>>(table: &'a Table, names: &[S]) -> Result<Vec<Vec<&'a str>>> {
    for name in names {
        require_column(table, name.as_ref())?;
    }
    Ok(table
        .iter()
        .map(|row| {
            names
                .iter()
                .map(|n| row.get(n.as_ref()).map_or("", String::as_str))
                .collect()
        })
        .collect())
}

/// Index rows by the value in column `key`.
///
/// With `unique`, a key seen twice is [`TableError::DuplicateKey`];
/// otherwise the first row for each key wins. Use [`group_by`] to keep
/// them all.
pub fn as_dict<'a>(table: &'a Table, key: &str, unique: bool) -> Result<IndexMap<String, &'a Record>> {
    require_column(table, key)?;
    let mut map = IndexMap::with_capacity(table.len());
    for row in table {
        let value = row.get(key).cloned().unwrap_or_default();
        if map.contains_key(&value) {
            if unique {
                return Err(TableError::DuplicateKey {
                    column: key.to_string(),
                    key: value,
                }
                .into());
            }
            continue;
        }
        map.insert(value, row);
    }
    Ok(map)
}

/// Rows grouped by the value in column `key`, groups in first-seen order.
pub fn group_by<'a>(table: &'a Table, key: &str) -> Result<IndexMap<String, Vec<&'a Record>>> {
    require_column(table, key)?;
    let mut groups: IndexMap<String, Vec<&Record>> = IndexMap::new();
    for row in table {
        let value = row.get(key).cloned().unwrap_or_default();
        groups.entry(value).or_default().push(row);
    }
    Ok(groups)
}

/// A copy of `table` without the named columns.
pub fn remove_columns<S: AsRef<str>>(table: &Table, names: &[S]) -> Result<Table> {
    for name in names {
        require_column(table, name.as_ref())?;
    }
    let dropped = |h: &str| names.iter().any(|n| n.as_ref() == h);
    let headers = table.headers().iter().filter(|h| !dropped(h.as_str())).cloned().collect();

    let mut out = Table::new(headers);
    for row in table {
        out.push(
            row.iter()
                .filter(|(h, _)| !dropped(h.as_str()))
                .map(|(h, v)| (h.clone(), v.clone()))
                .collect(),
        );
    }
    Ok(out)
}

fn require_column(table: &Table, name: &str) -> Result<()> {
    if table.has_column(name) {
        Ok(())
    } else {
        Err(TableError::UnknownColumn(name.to_string()).into())
    }
}
