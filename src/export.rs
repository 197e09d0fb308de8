// src/export.rs

use anyhow::{Context, Result};
use csv::Writer;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

use crate::clean::ANALYSIS_TABLE;
use crate::config::PipelineConfig;
use crate::ingest::COUNTRY_TABLE;
use crate::store;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportedFile {
    pub table: String,
    pub path: PathBuf,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub files: Vec<ExportedFile>,
}

/// Stage 4: dump `analysis_clean` and `country` to CSV, overwriting existing files.
#[instrument(level = "info", skip_all)]
pub fn run(conn: &Connection, cfg: &PipelineConfig) -> Result<ExportReport> {
    let targets = [
        (ANALYSIS_TABLE, cfg.analysis_export_path()),
        (COUNTRY_TABLE, cfg.country_export_path()),
    ];
    // check both before writing either
    for (table, _) in &targets {
        store::require_table(conn, table)?;
    }

    let mut files = Vec::with_capacity(targets.len());
    for (table, path) in targets {
        let rows = export_table(conn, table, &path)?;
        info!(table, path = %path.display(), rows, "exported");
        files.push(ExportedFile {
            table: table.to_string(),
            path,
            rows,
        });
    }
    Ok(ExportReport { files })
}

/// Write every row of `table` to `path` with a header row. NULL becomes an empty cell.
pub fn export_table<P: AsRef<Path>>(conn: &Connection, table: &str, path: P) -> Result<usize> {
    let path = path.as_ref();
    let mut stmt = conn.prepare(&format!("SELECT * FROM \"{}\"", table))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut wtr = Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    wtr.write_record(&columns)?;

    let mut rows = stmt.query([])?;
    let mut count = 0;
    while let Some(row) = rows.next()? {
        let mut record = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            record.push(store::cell_text(row.get_ref(i)?).unwrap_or_default());
        }
        wtr.write_record(&record)
            .with_context(|| format!("writing row {} of {}", count, path.display()))?;
        count += 1;
    }
    wtr.flush().with_context(|| format!("flushing {}", path.display()))?;
    Ok(count)
}
