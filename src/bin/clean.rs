//! Stage binary: build analysis_clean from the raw tables.

use anyhow::Result;
use wdi_pipeline::{logging, run_stage, PipelineConfig, Stage, StageOutcome};

fn main() -> Result<()> {
    logging::init();
    let cfg = PipelineConfig::load()?;
    let outcome = run_stage(Stage::Clean, &cfg)?;
    if let StageOutcome::Cleaned(report) = outcome {
        println!("Aggregates dropped: {}", report.aggregates_dropped);
        println!("Values coerced to null: {}", report.values_coerced_to_null);
        println!("Rows written: {}", report.rows_written);
    }
    Ok(())
}
