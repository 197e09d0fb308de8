// src/ingest.rs

use anyhow::{Context, Result};
use csv::{ReaderBuilder, StringRecord};
use rusqlite::{params, Connection};
use std::{
    collections::HashSet,
    fs::File,
    io::BufReader,
    path::Path,
};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::fetch::ensure_source_files;
use crate::model::Country;
use crate::store;

pub const COUNTRY_TABLE: &str = "country";
pub const INDICATORS_TABLE: &str = "indicators";

const COUNTRY_COLUMNS: [&str; 4] = ["Country Code", "Short Name", "Region", "Income Group"];
const ID_COLUMNS: [&str; 4] = ["Country Name", "Country Code", "Indicator Name", "Indicator Code"];

/// A long-form indicator row before cleaning; `value` is the raw cell text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub country_name: Option<String>,
    pub country_code: Option<String>,
    pub indicator_name: Option<String>,
    pub indicator_code: String,
    pub year: i32,
    pub value: Option<String>,
}

/// Output of the wide-to-long reshape.
#[derive(Debug, Default)]
pub struct MeltedIndicators {
    pub rows: Vec<RawObservation>,
    /// Year columns kept.
    pub year_columns: usize,
    /// Headers that did not parse as a year, e.g. a trailing blank column.
    pub skipped_year_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub downloaded: bool,
    pub countries: usize,
    pub countries_without_code: usize,
    pub observations: usize,
    pub year_columns: usize,
    pub skipped_year_columns: usize,
}

/// Both source files parsed and ready to persist.
#[derive(Debug, Default)]
pub struct SourceData {
    pub downloaded: bool,
    pub countries: Vec<Country>,
    pub countries_without_code: usize,
    pub melted: MeltedIndicators,
}

/// Stage 1: resolve the source files, load both CSVs and replace the raw tables.
#[instrument(level = "info", skip_all, fields(db = %cfg.db_path().display()))]
pub fn run(conn: &mut Connection, cfg: &PipelineConfig) -> Result<IngestReport> {
    let data = load(cfg)?;
    persist(conn, &data)
}

/// Resolve and parse both source files without touching the database.
pub fn load(cfg: &PipelineConfig) -> Result<SourceData> {
    let files = ensure_source_files(cfg)?;

    info!(path = %files.country.display(), "loading country data");
    let (countries, countries_without_code) = read_countries(&files.country)?;

    info!(path = %files.data.display(), "loading indicator data");
    let melted = read_indicators(&files.data, &cfg.indicator_codes)?;
    if !melted.skipped_year_columns.is_empty() {
        warn!(
            columns = ?melted.skipped_year_columns,
            "dropped columns whose header is not a year"
        );
    }

    Ok(SourceData {
        downloaded: files.downloaded,
        countries,
        countries_without_code,
        melted,
    })
}

/// Replace the raw tables with `data`.
pub fn persist(conn: &mut Connection, data: &SourceData) -> Result<IngestReport> {
    info!("saving to database");
    write_tables(conn, &data.countries, &data.melted.rows)?;

    let report = IngestReport {
        downloaded: data.downloaded,
        countries: data.countries.len(),
        countries_without_code: data.countries_without_code,
        observations: data.melted.rows.len(),
        year_columns: data.melted.year_columns,
        skipped_year_columns: data.melted.skipped_year_columns.len(),
    };
    info!(
        countries = report.countries,
        observations = report.observations,
        dropped_countries = report.countries_without_code,
        "database created"
    );
    Ok(report)
}

/// Read the country metadata file, keeping the four columns we need.
/// Returns the countries and the number of rows dropped for lacking a code.
pub fn read_countries<P: AsRef<Path>>(path: P) -> Result<(Vec<Country>, usize)> {
    let path = path.as_ref();
    let mut rdr = csv_reader(path)?;
    let headers = clean_headers(rdr.headers().with_context(|| format!("reading header of {}", path.display()))?);

    let idx = COUNTRY_COLUMNS
        .iter()
        .map(|name| column_index(&headers, name, path))
        .collect::<Result<Vec<_>>>()?;

    let mut countries = Vec::new();
    let mut dropped = 0;
    for (n, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error in {} at record {}", path.display(), n))?;
        let Some(country_code) = cell(&record, idx[0]) else {
            dropped += 1;
            continue;
        };
        countries.push(Country {
            country_code,
            country_name: cell(&record, idx[1]),
            region: cell(&record, idx[2]),
            income_group: cell(&record, idx[3]),
        });
    }
    debug!(rows = countries.len(), dropped, "country file parsed");
    Ok((countries, dropped))
}

/// Read the wide indicator file and melt it to one row per (country, indicator, year),
/// keeping only indicator codes in `allowed`.
///
/// Rows come out year-major: every kept row for the first year column, then the next.
pub fn read_indicators<P: AsRef<Path>>(path: P, allowed: &[String]) -> Result<MeltedIndicators> {
    let path = path.as_ref();
    let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
    let mut rdr = csv_reader(path)?;
    let headers = clean_headers(rdr.headers().with_context(|| format!("reading header of {}", path.display()))?);

    let id_idx = ID_COLUMNS
        .iter()
        .map(|name| column_index(&headers, name, path))
        .collect::<Result<Vec<_>>>()?;

    // every non-id column is a candidate year
    let mut years: Vec<(usize, i32)> = Vec::new();
    let mut skipped = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        if id_idx.contains(&i) {
            continue;
        }
        match parse_year(h) {
            Some(y) => years.push((i, y)),
            None => skipped.push(h.to_string()),
        }
    }

    let mut kept: Vec<StringRecord> = Vec::new();
    for (n, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error in {} at record {}", path.display(), n))?;
        let code = record.get(id_idx[3]).map(str::trim).unwrap_or_default();
        if allowed.contains(code) {
            kept.push(record);
        }
    }
    debug!(rows = kept.len(), years = years.len(), "indicator rows kept before melt");

    let mut rows = Vec::with_capacity(kept.len() * years.len());
    for &(col, year) in &years {
        for record in &kept {
            rows.push(RawObservation {
                country_name: cell(record, id_idx[0]),
                country_code: cell(record, id_idx[1]),
                indicator_name: cell(record, id_idx[2]),
                indicator_code: record.get(id_idx[3]).unwrap_or_default().trim().to_string(),
                year,
                value: cell(record, col),
            });
        }
    }

    Ok(MeltedIndicators {
        rows,
        year_columns: years.len(),
        skipped_year_columns: skipped,
    })
}

/// Parse a year header: an integer, or a float with no fractional part.
pub fn parse_year(header: &str) -> Option<i32> {
    let h = header.trim();
    if let Ok(y) = h.parse::<i32>() {
        return Some(y);
    }
    match h.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 && f.abs() <= i32::MAX as f64 => Some(f as i32),
        _ => None,
    }
}

/// Replace `country` and `indicators` in one transaction and index the join keys.
pub fn write_tables(conn: &mut Connection, countries: &[Country], rows: &[RawObservation]) -> Result<()> {
    let tx = conn.transaction()?;

    store::replace_table(
        &tx,
        COUNTRY_TABLE,
        &[
            ("country_code", "TEXT"),
            ("country_name", "TEXT"),
            ("region", "TEXT"),
            ("income_group", "TEXT"),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO country (country_code, country_name, region, income_group) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for c in countries {
            stmt.execute(params![c.country_code, c.country_name, c.region, c.income_group])?;
        }
    }

    // `value` keeps REAL affinity: numeric text is stored as a number,
    // anything else (e.g. "..") stays text until cleaning.
    store::replace_table(
        &tx,
        INDICATORS_TABLE,
        &[
            ("country_name", "TEXT"),
            ("country_code", "TEXT"),
            ("indicator_name", "TEXT"),
            ("indicator_code", "TEXT"),
            ("year", "INTEGER"),
            ("value", "REAL"),
        ],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO indicators (country_name, country_code, indicator_name, indicator_code, year, value) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for r in rows {
            stmt.execute(params![
                r.country_name,
                r.country_code,
                r.indicator_name,
                r.indicator_code,
                r.year,
                r.value
            ])?;
        }
    }

    info!("creating indexes");
    store::create_index(&tx, "idx_country_code", COUNTRY_TABLE, "country_code")?;
    store::create_index(&tx, "idx_indicators_code", INDICATORS_TABLE, "indicator_code")?;
    store::create_index(&tx, "idx_indicators_country", INDICATORS_TABLE, "country_code")?;
    store::create_index(&tx, "idx_indicators_year", INDICATORS_TABLE, "year")?;

    tx.commit().context("committing raw tables")?;
    Ok(())
}

fn csv_reader(path: &Path) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file)))
}

/// Header names with whitespace and a leading UTF-8 BOM removed.
fn clean_headers(headers: &StringRecord) -> Vec<String> {
    headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect()
}

fn column_index(headers: &[String], name: &str, file: &Path) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .ok_or_else(|| {
            PipelineError::MissingColumn {
                file: file.to_path_buf(),
                column: name.to_string(),
            }
            .into()
        })
}

/// Field `i` of `record`; empty cells are null.
fn cell(record: &StringRecord, i: usize) -> Option<String> {
    record
        .get(i)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use std::fs;

    const COUNTRIES: &str = "\u{feff}Country Code,Short Name,Table Name,Region,Income Group\n\
        FRA,France,France,Europe & Central Asia,High income\n\
        WLD,World,World,,\n\
        ,Nowhere,Nowhere,Europe & Central Asia,\n";

    const DATA: &str = "Country Name,Country Code,Indicator Name,Indicator Code,1960,1961,\n\
        France,FRA,GDP (current US$),NY.GDP.MKTP.CD,100,..,\n\
        France,FRA,Population,SP.POP.TOTL,10,20,\n\
        France,FRA,Literacy,SE.ADT.LITR.ZS,1,2,\n";

    fn allow() -> Vec<String> {
        crate::config::PipelineConfig::default().indicator_codes
    }

    #[test]
    fn parse_year_accepts_integral_headers() {
        assert_eq!(parse_year("1960"), Some(1960));
        assert_eq!(parse_year(" 2020 "), Some(2020));
        assert_eq!(parse_year("1999.0"), Some(1999));
        assert_eq!(parse_year("1999.5"), None);
        assert_eq!(parse_year(""), None);
        assert_eq!(parse_year("Unnamed: 68"), None);
    }

    #[test]
    fn countries_without_code_are_dropped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("WDICountry.csv");
        fs::write(&path, COUNTRIES)?;

        let (countries, dropped) = read_countries(&path)?;
        assert_eq!(dropped, 1);
        assert_eq!(countries.len(), 2);
        assert_eq!(countries[0].country_code, "FRA");
        assert_eq!(countries[0].region.as_deref(), Some("Europe & Central Asia"));
        assert_eq!(countries[1].region, None);
        Ok(())
    }

    #[test]
    fn missing_country_column_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("WDICountry.csv");
        fs::write(&path, "Country Code,Short Name,Region\nFRA,France,Europe\n")?;

        let err = read_countries(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingColumn { column, .. }) if column == "Income Group"
        ));
        Ok(())
    }

    #[test]
    fn melt_is_year_major_and_filtered() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("WDICSV.csv");
        fs::write(&path, DATA)?;

        let melted = read_indicators(&path, &allow())?;
        assert_eq!(melted.year_columns, 2);
        assert_eq!(melted.skipped_year_columns, vec![String::new()]);

        let keys: Vec<(&str, i32, Option<&str>)> = melted
            .rows
            .iter()
            .map(|r| (r.indicator_code.as_str(), r.year, r.value.as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("NY.GDP.MKTP.CD", 1960, Some("100")),
                ("SP.POP.TOTL", 1960, Some("10")),
                ("NY.GDP.MKTP.CD", 1961, Some("..")),
                ("SP.POP.TOTL", 1961, Some("20")),
            ]
        );
        Ok(())
    }

    #[test]
    fn run_persists_tables_and_indexes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("WDICountry.csv"), COUNTRIES)?;
        fs::write(dir.path().join("WDICSV.csv"), DATA)?;
        let cfg = PipelineConfig::in_dir(dir.path());

        let mut conn = Connection::open_in_memory()?;
        let report = run(&mut conn, &cfg)?;
        assert_eq!(report.countries, 2);
        assert_eq!(report.observations, 4);
        assert!(!report.downloaded);

        // numeric text is stored as REAL, the missing marker stays text
        let kinds: Vec<String> = conn
            .prepare("SELECT typeof(value) FROM indicators ORDER BY rowid")?
            .query_map([], |r| r.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        assert_eq!(kinds, vec!["real", "real", "text", "real"]);

        let indexes: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(indexes, 4);

        // a second run replaces rather than appends
        run(&mut conn, &cfg)?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM indicators", [], |r| r.get(0))?;
        assert_eq!(n, 4);
        Ok(())
    }
}
