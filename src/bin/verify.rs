//! Stage binary: print sanity checks for analysis_clean.

use anyhow::Result;
use wdi_pipeline::{logging, run_stage, PipelineConfig, Stage, StageOutcome};

fn main() -> Result<()> {
    logging::init();
    let cfg = PipelineConfig::load()?;
    let outcome = run_stage(Stage::Verify, &cfg)?;
    if let StageOutcome::Verified(report) = outcome {
        println!("{}", report);
    }
    Ok(())
}
