// src/verify.rs

use anyhow::Result;
use rusqlite::{params, Connection};
use std::fmt;
use tracing::{info, instrument};

use crate::clean::ANALYSIS_TABLE;
use crate::config::PipelineConfig;
use crate::store::{self, QueryTable};

/// Per-indicator coverage of a long-form table.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorCoverage {
    pub indicator_code: String,
    pub countries_covered: i64,
    pub first_year: Option<i64>,
    pub last_year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    pub sample: QueryTable,
    pub indicator_sample: QueryTable,
    pub coverage: Vec<IndicatorCoverage>,
    pub total_records: i64,
    pub regions: Vec<String>,
}

/// Stage 3: read-only sanity queries against `analysis_clean`.
#[instrument(level = "info", skip_all)]
pub fn run(conn: &Connection, cfg: &PipelineConfig) -> Result<VerifyReport> {
    store::require_table(conn, ANALYSIS_TABLE)?;

    let sample = sample_rows(conn, ANALYSIS_TABLE, cfg.sample_rows)?;
    let indicator_sample = indicator_sample(
        conn,
        ANALYSIS_TABLE,
        &cfg.gdp_code,
        &cfg.population_code,
        cfg.indicator_sample_rows,
    )?;
    let coverage = coverage(conn, ANALYSIS_TABLE)?;
    let total_records = count_rows(conn, ANALYSIS_TABLE)?;
    let regions = distinct_regions(conn, ANALYSIS_TABLE)?;

    info!(
        records = total_records,
        indicators = coverage.len(),
        regions = regions.len(),
        "verification queries complete"
    );
    Ok(VerifyReport {
        sample,
        indicator_sample,
        coverage,
        total_records,
        regions,
    })
}

pub fn sample_rows(conn: &Connection, table: &str, limit: u32) -> Result<QueryTable> {
    store::query_table(
        conn,
        &format!("SELECT * FROM \"{}\" ORDER BY rowid LIMIT ?1", table),
        params![limit],
    )
}

/// Rows for the two given indicator codes.
pub fn indicator_sample(
    conn: &Connection,
    table: &str,
    first_code: &str,
    second_code: &str,
    limit: u32,
) -> Result<QueryTable> {
    store::query_table(
        conn,
        &format!(
            "SELECT * FROM \"{}\" WHERE indicator_code IN (?1, ?2) ORDER BY rowid LIMIT ?3",
            table
        ),
        params![first_code, second_code, limit],
    )
}

/// Distinct countries and year range per indicator code, ordered by code.
pub fn coverage(conn: &Connection, table: &str) -> Result<Vec<IndicatorCoverage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT indicator_code,
                COUNT(DISTINCT country_code) AS countries_covered,
                MIN(year) AS first_year,
                MAX(year) AS last_year
         FROM \"{}\"
         GROUP BY indicator_code
         ORDER BY indicator_code",
        table
    ))?;
    let rows = stmt
        .query_map([], |r| {
            Ok(IndicatorCoverage {
                indicator_code: r.get(0)?,
                countries_covered: r.get(1)?,
                first_year: r.get(2)?,
                last_year: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64> {
    let n = conn.query_row(&format!("SELECT COUNT(*) FROM \"{}\"", table), [], |r| r.get(0))?;
    Ok(n)
}

pub fn distinct_regions(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT region FROM \"{}\" ORDER BY region",
        table
    ))?;
    let rows = stmt
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

impl fmt::Display for VerifyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cleaned data sample:")?;
        writeln!(f, "{}", self.sample)?;
        writeln!(f, "Indicator data sample:")?;
        writeln!(f, "{}", self.indicator_sample)?;

        writeln!(f, "Data coverage:")?;
        writeln!(
            f,
            "{: <20} {:>17} {:>10} {:>10}",
            "indicator_code", "countries_covered", "first_year", "last_year"
        )?;
        writeln!(f, "{:-<60}", "")?;
        for c in &self.coverage {
            writeln!(
                f,
                "{: <20} {:>17} {:>10} {:>10}",
                c.indicator_code,
                c.countries_covered,
                c.first_year.map_or_else(|| "NULL".to_string(), |y| y.to_string()),
                c.last_year.map_or_else(|| "NULL".to_string(), |y| y.to_string()),
            )?;
        }

        writeln!(f, "\nTotal records: {}", self.total_records)?;
        writeln!(f, "\nRegions:")?;
        for r in &self.regions {
            writeln!(f, "  {}", r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GDP_CODE, POPULATION_CODE};
    use crate::ingest::{write_tables, RawObservation};
    use crate::model::Country;
    use anyhow::Result;

    fn seeded() -> Result<Connection> {
        let mut conn = Connection::open_in_memory()?;
        let countries: Vec<Country> = [("FRA", "Europe & Central Asia"), ("KEN", "Sub-Saharan Africa")]
            .iter()
            .map(|(code, region)| Country {
                country_code: code.to_string(),
                country_name: Some(code.to_string()),
                region: Some(region.to_string()),
                income_group: None,
            })
            .collect();
        let mut rows = Vec::new();
        for year in [1990, 2000, 2020] {
            for (code, indicator) in [("FRA", GDP_CODE), ("FRA", POPULATION_CODE), ("KEN", GDP_CODE)] {
                rows.push(RawObservation {
                    country_name: None,
                    country_code: Some(code.to_string()),
                    indicator_name: None,
                    indicator_code: indicator.to_string(),
                    year,
                    value: Some("1".to_string()),
                });
            }
        }
        write_tables(&mut conn, &countries, &rows)?;
        crate::clean::run(&mut conn, &PipelineConfig::default())?;
        Ok(conn)
    }

    #[test]
    fn coverage_counts_countries_and_years() -> Result<()> {
        let conn = seeded()?;
        let report = run(&conn, &PipelineConfig::default())?;

        assert_eq!(report.total_records, 9);
        assert_eq!(report.sample.len(), 5);
        assert_eq!(report.indicator_sample.len(), 9);
        assert_eq!(
            report.coverage,
            vec![
                IndicatorCoverage {
                    indicator_code: GDP_CODE.to_string(),
                    countries_covered: 2,
                    first_year: Some(1990),
                    last_year: Some(2020),
                },
                IndicatorCoverage {
                    indicator_code: POPULATION_CODE.to_string(),
                    countries_covered: 1,
                    first_year: Some(1990),
                    last_year: Some(2020),
                },
            ]
        );
        assert_eq!(report.regions, vec!["Europe & Central Asia", "Sub-Saharan Africa"]);
        assert!(report.to_string().contains("Total records: 9"));
        Ok(())
    }

    #[test]
    fn indexes_do_not_change_results() -> Result<()> {
        let conn = seeded()?;
        let cfg = PipelineConfig::default();
        let with_indexes = run(&conn, &cfg)?;

        conn.execute_batch(
            "DROP INDEX idx_clean_country; DROP INDEX idx_clean_year; DROP INDEX idx_clean_indicator;",
        )?;
        let without_indexes = run(&conn, &cfg)?;
        assert_eq!(with_indexes, without_indexes);
        Ok(())
    }

    #[test]
    fn samples_follow_row_order_with_indexes_present() -> Result<()> {
        let conn = seeded()?;
        let sample = indicator_sample(&conn, ANALYSIS_TABLE, GDP_CODE, POPULATION_CODE, 3)?;

        let keys: Vec<(Option<&str>, Option<&str>, Option<&str>)> = sample
            .rows
            .iter()
            .map(|r| (r[1].as_deref(), r[3].as_deref(), r[4].as_deref()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Some("FRA"), Some(GDP_CODE), Some("1990")),
                (Some("FRA"), Some(POPULATION_CODE), Some("1990")),
                (Some("KEN"), Some(GDP_CODE), Some("1990")),
            ]
        );

        assert_eq!(
            distinct_regions(&conn, "country")?,
            vec!["Europe & Central Asia", "Sub-Saharan Africa"]
        );
        Ok(())
    }
}
