/// A row of the `country` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Country {
    pub country_code: String,
    pub country_name: Option<String>,
    /// `None` marks an aggregate such as "World" or "Euro area".
    pub region: Option<String>,
    pub income_group: Option<String>,
}

/// One (country, indicator, year) cell of the long-form `indicators` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub country_name: Option<String>,
    pub country_code: String,
    pub indicator_name: Option<String>,
    pub indicator_code: String,
    pub year: i32,
    pub value: Option<f64>,
}

/// A row of `analysis_clean`.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRecord {
    /// Country name as spelled in the data file.
    pub source_country_name: Option<String>,
    pub country_code: String,
    pub indicator_name: Option<String>,
    pub indicator_code: String,
    pub year: i32,
    pub value: Option<f64>,
    /// Normalized name from the country table.
    pub country_name: Option<String>,
    pub region: String,
    pub income_group: Option<String>,
    pub decade: i64,
    pub gdp_per_capita: Option<f64>,
}
