// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use crate::error::PipelineError;

pub const DEFAULT_ARCHIVE_URL: &str = "https://databank.worldbank.org/data/download/WDI_CSV.zip";
pub const GDP_CODE: &str = "NY.GDP.MKTP.CD";
pub const POPULATION_CODE: &str = "SP.POP.TOTL";
pub const GDP_PER_CAPITA_CODE: &str = "NY.GDP.PCAP.CD";

/// File the binaries look for in the current directory.
pub const CONFIG_FILE: &str = "pipeline.yaml";

/// Every name the stages touch: where the data comes from, where it lands,
/// and which indicators survive ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub archive_url: String,
    /// Directory holding the source CSVs, the database and the exports.
    pub work_dir: PathBuf,
    pub db_file: String,
    pub country_file: String,
    pub data_file: String,
    /// Indicator allow-list applied during ingestion.
    pub indicator_codes: Vec<String>,
    pub gdp_code: String,
    pub population_code: String,
    pub analysis_export: String,
    pub country_export: String,
    pub sample_rows: u32,
    pub indicator_sample_rows: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            work_dir: PathBuf::from("."),
            db_file: "world_data.db".to_string(),
            country_file: "WDICountry.csv".to_string(),
            data_file: "WDICSV.csv".to_string(),
            indicator_codes: vec![
                GDP_CODE.to_string(),
                POPULATION_CODE.to_string(),
                GDP_PER_CAPITA_CODE.to_string(),
            ],
            gdp_code: GDP_CODE.to_string(),
            population_code: POPULATION_CODE.to_string(),
            analysis_export: "world_data.csv".to_string(),
            country_export: "country.csv".to_string(),
            sample_rows: 5,
            indicator_sample_rows: 10,
        }
    }
}

impl PipelineConfig {
    /// Defaults rooted at `work_dir`.
    pub fn in_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a YAML file. Missing keys fall back to their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `pipeline.yaml` from the current directory if present, else defaults.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            info!(path = %path.display(), "loading configuration");
            Self::from_yaml_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.indicator_codes.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "indicator_codes must not be empty".to_string(),
            )
            .into());
        }
        for code in [&self.gdp_code, &self.population_code] {
            if !self.indicator_codes.contains(code) {
                warn!(code = %code, "code is not in the indicator allow-list; gdp_per_capita will stay null");
            }
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.work_dir.join(&self.db_file)
    }

    pub fn country_path(&self) -> PathBuf {
        self.work_dir.join(&self.country_file)
    }

    pub fn data_path(&self) -> PathBuf {
        self.work_dir.join(&self.data_file)
    }

    pub fn analysis_export_path(&self) -> PathBuf {
        self.work_dir.join(&self.analysis_export)
    }

    pub fn country_export_path(&self) -> PathBuf {
        self.work_dir.join(&self.country_export)
    }
}
