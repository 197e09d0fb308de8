//! Stage binary: dump analysis_clean and country to CSV.

use anyhow::Result;
use wdi_pipeline::{logging, run_stage, PipelineConfig, Stage, StageOutcome};

fn main() -> Result<()> {
    logging::init();
    let cfg = PipelineConfig::load()?;
    let outcome = run_stage(Stage::Export, &cfg)?;
    if let StageOutcome::Exported(report) = outcome {
        for file in &report.files {
            println!("{} -> {} ({} rows)", file.table, file.path.display(), file.rows);
        }
    }
    Ok(())
}
