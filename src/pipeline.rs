// src/pipeline.rs

use anyhow::Result;
use std::{fmt, time::Instant};
use tracing::{info, info_span};

use crate::clean::{self, CleanReport};
use crate::config::PipelineConfig;
use crate::export::{self, ExportReport};
use crate::ingest::{self, IngestReport};
use crate::store;
use crate::verify::{self, VerifyReport};

/// The four stages, in the order they must run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingest,
    Clean,
    Verify,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Clean, Stage::Verify, Stage::Export];

    pub fn as_str(&self) -> &str {
        match self {
            Stage::Ingest => "ingest",
            Stage::Clean => "clean",
            Stage::Verify => "verify",
            Stage::Export => "export",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Ingested(IngestReport),
    Cleaned(CleanReport),
    Verified(VerifyReport),
    Exported(ExportReport),
}

/// Run one stage on its own connection; the connection closes when the stage returns.
/// Only ingest may create the store; verification and export open it read-only.
pub fn run_stage(stage: Stage, cfg: &PipelineConfig) -> Result<StageOutcome> {
    let _span = info_span!("stage", name = stage.as_str()).entered();
    let start = Instant::now();
    let db = cfg.db_path();

    let outcome = match stage {
        Stage::Ingest => {
            // inputs must parse before the database file exists
            let data = ingest::load(cfg)?;
            let mut conn = store::open(&db)?;
            StageOutcome::Ingested(ingest::persist(&mut conn, &data)?)
        }
        Stage::Clean => {
            let mut conn = store::open_existing(&db)?;
            StageOutcome::Cleaned(clean::run(&mut conn, cfg)?)
        }
        Stage::Verify => {
            let conn = store::open_read_only(&db)?;
            StageOutcome::Verified(verify::run(&conn, cfg)?)
        }
        Stage::Export => {
            let conn = store::open_read_only(&db)?;
            StageOutcome::Exported(export::run(&conn, cfg)?)
        }
    };

    info!(elapsed = ?start.elapsed(), "stage finished");
    Ok(outcome)
}

/// Run every stage in order, stopping at the first failure.
pub fn run_all(cfg: &PipelineConfig) -> Result<Vec<StageOutcome>> {
    cfg.validate()?;
    Stage::ALL.iter().map(|&stage| run_stage(stage, cfg)).collect()
}
