// src/store.rs

use anyhow::{Context, Result};
use rusqlite::{types::ValueRef, Connection, OpenFlags, Params};
use std::{fmt, fs, path::Path};
use tracing::debug;

use crate::error::PipelineError;

/// Open (or create) the database file at `path`, creating its directory if needed.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let conn = Connection::open(path)
        .with_context(|| format!("opening database {}", path.display()))?;
    debug!(path = %path.display(), "opened database");
    Ok(conn)
}

/// Open an existing database file for writing; never creates one.
pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_WRITE)
        .with_context(|| format!("opening database {}", path.display()))?;
    debug!(path = %path.display(), "opened existing database");
    Ok(conn)
}

/// Open an existing database file without write access.
pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(PipelineError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("opening database {} read-only", path.display()))?;
    debug!(path = %path.display(), "opened database read-only");
    Ok(conn)
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

/// Fail with [`PipelineError::MissingTable`] unless `table` exists.
pub fn require_table(conn: &Connection, table: &str) -> Result<()> {
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(PipelineError::MissingTable(table.to_string()).into())
    }
}

/// Drop `table` if present and create it afresh with `columns` as `(name, type)` pairs.
pub fn replace_table(conn: &Connection, table: &str, columns: &[(&str, &str)]) -> Result<()> {
    let cols = columns
        .iter()
        .map(|(name, ty)| format!("\"{}\" {}", name, ty))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS \"{table}\"; CREATE TABLE \"{table}\" ({cols});",
        table = table,
        cols = cols
    ))
    .with_context(|| format!("replacing table {}", table))?;
    Ok(())
}

pub fn create_index(conn: &Connection, index: &str, table: &str, column: &str) -> Result<()> {
    conn.execute_batch(&format!(
        "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\"(\"{}\");",
        index, table, column
    ))
    .with_context(|| format!("creating index {} on {}({})", index, table, column))?;
    Ok(())
}

/// Text form of a stored value; `None` for SQL NULL.
pub fn cell_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(format!("<{} bytes>", b.len())),
    }
}

/// The result of an arbitrary query, with every cell rendered as text.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Run `sql` and collect the whole result.
pub fn query_table<P: Params>(conn: &Connection, sql: &str, params: P) -> Result<QueryTable> {
    let mut stmt = conn
        .prepare(sql)
        .with_context(|| format!("preparing `{}`", sql))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query(params)?;
    while let Some(row) = cursor.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(cell_text(row.get_ref(i)?));
        }
        rows.push(cells);
    }
    Ok(QueryTable { columns, rows })
}

impl fmt::Display for QueryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut widths: Vec<usize> = self.columns.iter().map(|c| c.chars().count()).collect();
        for row in &self.rows {
            for (w, cell) in widths.iter_mut().zip(row) {
                let len = cell.as_deref().unwrap_or("NULL").chars().count();
                *w = (*w).max(len);
            }
        }

        for (w, name) in widths.iter().zip(&self.columns) {
            write!(f, "{: <w$}  ", name, w = *w)?;
        }
        writeln!(f)?;
        let total: usize = widths.iter().map(|w| w + 2).sum();
        writeln!(f, "{:-<total$}", "", total = total)?;
        for row in &self.rows {
            for (w, cell) in widths.iter().zip(row) {
                write!(f, "{: <w$}  ", cell.as_deref().unwrap_or("NULL"), w = *w)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
