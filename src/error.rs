//! Fatal precondition failures.
//!
//! Stages return `anyhow::Result`; these variants are wrapped in it so that
//! callers can still `downcast_ref::<PipelineError>()` to tell them apart.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("column `{column}` not found in {}", file.display())]
    MissingColumn { file: PathBuf, column: String },

    #[error("table `{0}` does not exist; run the earlier stages first")]
    MissingTable(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
