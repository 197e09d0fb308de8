pub mod clean;
pub mod config;
pub mod error;
pub mod export;
pub mod fetch;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod store;
pub mod verify;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{run_all, run_stage, Stage, StageOutcome};
