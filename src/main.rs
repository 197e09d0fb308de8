use anyhow::Result;
use tracing::info;
use wdi_pipeline::{logging, run_all, PipelineConfig, StageOutcome};

fn main() -> Result<()> {
    logging::init();
    info!("startup");

    let cfg = PipelineConfig::load()?;
    for outcome in run_all(&cfg)? {
        if let StageOutcome::Verified(report) = outcome {
            println!("{}", report);
        }
    }

    info!(db = %cfg.db_path().display(), "all done");
    Ok(())
}
