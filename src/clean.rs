// src/clean.rs

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::{params, types::ValueRef, Connection};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, instrument, warn};

use crate::config::PipelineConfig;
use crate::ingest::{COUNTRY_TABLE, INDICATORS_TABLE};
use crate::model::{AnalysisRecord, Country, Observation};
use crate::store;

pub const ANALYSIS_TABLE: &str = "analysis_clean";

const ANALYSIS_COLUMNS: [(&str, &str); 11] = [
    ("source_country_name", "TEXT"),
    ("country_code", "TEXT"),
    ("indicator_name", "TEXT"),
    ("indicator_code", "TEXT"),
    ("year", "INTEGER"),
    ("value", "REAL"),
    ("country_name", "TEXT"),
    ("region", "TEXT"),
    ("income_group", "TEXT"),
    ("decade", "INTEGER"),
    ("gdp_per_capita", "REAL"),
];

static PARENTHESIZED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(.*\)").expect("parenthesized-suffix regex should be valid"));

#[derive(Debug, Clone, PartialEq)]
pub struct CleanReport {
    pub countries_kept: usize,
    pub aggregates_dropped: usize,
    pub observations_read: usize,
    pub observations_outside_countries: usize,
    pub values_coerced_to_null: usize,
    pub gdp_per_capita_pairs: usize,
    pub rows_written: usize,
}

/// Observations of the kept countries, plus what loading skipped.
#[derive(Debug, Default)]
pub struct LoadedObservations {
    pub observations: Vec<Observation>,
    /// Every row of the raw table.
    pub rows_read: usize,
    /// Rows whose code is null or not a kept country.
    pub outside: usize,
    /// Kept rows whose non-null value did not parse.
    pub coerced: usize,
}

/// The joined analysis rows plus what the join threw away.
#[derive(Debug, Default)]
pub struct Analysis {
    pub records: Vec<AnalysisRecord>,
    pub observations_outside_countries: usize,
    pub gdp_per_capita_pairs: usize,
}

/// Stage 2: read the raw tables, clean and join them, and replace `analysis_clean`.
///
/// Nothing is written until every transformation has succeeded.
#[instrument(level = "info", skip_all)]
pub fn run(conn: &mut Connection, cfg: &PipelineConfig) -> Result<CleanReport> {
    store::require_table(conn, COUNTRY_TABLE)?;
    store::require_table(conn, INDICATORS_TABLE)?;

    info!("cleaning country data");
    let (countries, aggregates_dropped) = drop_aggregates(load_countries(conn)?);
    let countries: Vec<Country> = countries.into_iter().map(normalize_country).collect();

    info!("cleaning indicator data");
    let codes: HashSet<&str> = countries.iter().map(|c| c.country_code.as_str()).collect();
    let loaded = load_observations(conn, &codes)?;
    if loaded.coerced > 0 {
        warn!(count = loaded.coerced, "non-numeric indicator values set to null");
    }

    info!("creating analysis view");
    let analysis = build_analysis(&countries, loaded.observations, &cfg.gdp_code, &cfg.population_code);

    info!("saving cleaned data");
    write_analysis(conn, &analysis.records)?;

    let report = CleanReport {
        countries_kept: countries.len(),
        aggregates_dropped,
        observations_read: loaded.rows_read,
        observations_outside_countries: loaded.outside + analysis.observations_outside_countries,
        values_coerced_to_null: loaded.coerced,
        gdp_per_capita_pairs: analysis.gdp_per_capita_pairs,
        rows_written: analysis.records.len(),
    };
    info!(
        countries = report.countries_kept,
        aggregates = report.aggregates_dropped,
        dropped_observations = report.observations_outside_countries,
        gdp_per_capita_pairs = report.gdp_per_capita_pairs,
        rows = report.rows_written,
        "cleaned data saved"
    );
    Ok(report)
}

/// Split off aggregates (rows without a region). Returns the real countries
/// and how many aggregates were dropped.
pub fn drop_aggregates(countries: Vec<Country>) -> (Vec<Country>, usize) {
    let before = countries.len();
    let kept: Vec<Country> = countries.into_iter().filter(|c| c.region.is_some()).collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// `&` becomes `and`, commas go, a parenthesized span goes, then trim.
pub fn normalize_country_name(name: &str) -> String {
    let name = name.replace('&', "and").replace(',', "");
    PARENTHESIZED.replace_all(&name, "").trim().to_string()
}

fn normalize_country(mut c: Country) -> Country {
    c.country_name = c.country_name.as_deref().map(normalize_country_name);
    c
}

/// Numeric value of a stored cell. Text that does not parse, and NaN, become `None`.
pub fn coerce_numeric(value: ValueRef<'_>) -> Option<f64> {
    let v = match value {
        ValueRef::Null | ValueRef::Blob(_) => None,
        ValueRef::Integer(i) => Some(i as f64),
        ValueRef::Real(f) => Some(f),
        ValueRef::Text(t) => std::str::from_utf8(t).ok().and_then(|s| s.trim().parse::<f64>().ok()),
    };
    v.filter(|f| !f.is_nan())
}

/// Floor of `year / 10`, times ten. Widened so no `i32` year overflows.
pub fn decade(year: i32) -> i64 {
    i64::from(year).div_euclid(10) * 10
}

/// Inner-join observations to countries and attach the derived columns.
///
/// Output keeps observation order. A duplicated country code resolves to
/// its first row.
pub fn build_analysis(
    countries: &[Country],
    observations: Vec<Observation>,
    gdp_code: &str,
    population_code: &str,
) -> Analysis {
    let mut by_code: HashMap<&str, &Country> = HashMap::with_capacity(countries.len());
    for c in countries {
        by_code.entry(c.country_code.as_str()).or_insert(c);
    }

    let mut outside = 0;
    let mut records = Vec::with_capacity(observations.len());
    for obs in observations {
        let Some(country) = by_code.get(obs.country_code.as_str()) else {
            outside += 1;
            continue;
        };
        // region is Some for every country that survived drop_aggregates
        let Some(region) = country.region.clone() else {
            outside += 1;
            continue;
        };
        records.push(AnalysisRecord {
            source_country_name: obs.country_name,
            decade: decade(obs.year),
            country_code: obs.country_code,
            indicator_name: obs.indicator_name,
            indicator_code: obs.indicator_code,
            year: obs.year,
            value: obs.value,
            country_name: country.country_name.clone(),
            region,
            income_group: country.income_group.clone(),
            gdp_per_capita: None,
        });
    }

    let per_capita = gdp_per_capita(&records, gdp_code, population_code);
    for r in &mut records {
        r.gdp_per_capita = per_capita.get(&(r.country_code.clone(), r.year)).copied();
    }

    Analysis {
        gdp_per_capita_pairs: per_capita.len(),
        observations_outside_countries: outside,
        records,
    }
}

/// GDP divided by population for every (country_code, year) holding both.
///
/// The first observation of each code wins for a pair. A null side leaves the
/// pair out, as does 0/0; any other zero population gives an infinite ratio.
pub fn gdp_per_capita(
    records: &[AnalysisRecord],
    gdp_code: &str,
    population_code: &str,
) -> BTreeMap<(String, i32), f64> {
    let mut gdp: BTreeMap<(String, i32), Option<f64>> = BTreeMap::new();
    let mut population: BTreeMap<(String, i32), Option<f64>> = BTreeMap::new();
    for r in records {
        let target = if r.indicator_code == gdp_code {
            &mut gdp
        } else if r.indicator_code == population_code {
            &mut population
        } else {
            continue;
        };
        target.entry((r.country_code.clone(), r.year)).or_insert(r.value);
    }

    gdp.into_iter()
        .filter_map(|(key, g)| {
            let p = population.get(&key).copied().flatten()?;
            let ratio = g? / p;
            (!ratio.is_nan()).then(|| (key, ratio))
        })
        .collect()
}

/// Load the `country` table in row order.
pub fn load_countries(conn: &Connection) -> Result<Vec<Country>> {
    let mut stmt = conn.prepare(
        "SELECT country_code, country_name, region, income_group FROM country ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(Country {
                country_code: r.get(0)?,
                country_name: r.get(1)?,
                region: r.get(2)?,
                income_group: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .context("reading country table")?;
    Ok(rows)
}

/// Load the `indicators` rows of the countries in `keep`, in row order,
/// coercing `value` to a number. Rows with a null or unknown country code
/// are skipped before coercion, so `coerced` only counts rows that survive.
pub fn load_observations(conn: &Connection, keep: &HashSet<&str>) -> Result<LoadedObservations> {
    let mut stmt = conn.prepare(
        "SELECT country_name, country_code, indicator_name, indicator_code, year, value \
         FROM indicators ORDER BY rowid",
    )?;
    let mut rows = stmt.query([])?;

    let mut out = LoadedObservations::default();
    while let Some(row) = rows.next()? {
        out.rows_read += 1;
        let country_code = match row.get::<_, Option<String>>(1)? {
            Some(code) if keep.contains(code.as_str()) => code,
            _ => {
                out.outside += 1;
                continue;
            }
        };
        let raw = row.get_ref(5)?;
        let value = coerce_numeric(raw);
        if value.is_none() && !matches!(raw, ValueRef::Null) {
            out.coerced += 1;
        }
        out.observations.push(Observation {
            country_name: row.get(0)?,
            country_code,
            indicator_name: row.get(2)?,
            indicator_code: row.get(3)?,
            year: row.get(4)?,
            value,
        });
    }
    Ok(out)
}

/// Replace `analysis_clean` with `records` and index it, in one transaction.
pub fn write_analysis(conn: &mut Connection, records: &[AnalysisRecord]) -> Result<()> {
    let tx = conn.transaction()?;
    store::replace_table(&tx, ANALYSIS_TABLE, &ANALYSIS_COLUMNS)?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO analysis_clean (source_country_name, country_code, indicator_name, \
             indicator_code, year, value, country_name, region, income_group, decade, gdp_per_capita) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for r in records {
            stmt.execute(params![
                r.source_country_name,
                r.country_code,
                r.indicator_name,
                r.indicator_code,
                r.year,
                r.value,
                r.country_name,
                r.region,
                r.income_group,
                r.decade,
                r.gdp_per_capita
            ])?;
        }
    }
    store::create_index(&tx, "idx_clean_country", ANALYSIS_TABLE, "country_code")?;
    store::create_index(&tx, "idx_clean_year", ANALYSIS_TABLE, "year")?;
    store::create_index(&tx, "idx_clean_indicator", ANALYSIS_TABLE, "indicator_code")?;
    tx.commit().context("committing analysis_clean")?;
    Ok(())
}
