//! Stage binary: load the raw country and indicator tables.

use anyhow::Result;
use wdi_pipeline::{logging, run_stage, PipelineConfig, Stage, StageOutcome};

fn main() -> Result<()> {
    logging::init();
    let cfg = PipelineConfig::load()?;
    let outcome = run_stage(Stage::Ingest, &cfg)?;
    if let StageOutcome::Ingested(report) = outcome {
        println!("Database created: {}", cfg.db_path().display());
        println!("Country records: {}", report.countries);
        println!("Indicator records: {}", report.observations);
    }
    Ok(())
}
