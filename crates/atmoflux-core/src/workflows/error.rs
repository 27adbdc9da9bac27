use crate::analysis::AnalysisError;
use crate::core::container::ContainerError;
use crate::core::map::MapError;
use crate::stages::StageError;
use crate::stages::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Stage failed: {source}")]
    Stage {
        #[from]
        source: StageError,
    },

    #[error("Analysis failed: {source}")]
    Analysis {
        #[from]
        source: AnalysisError,
    },

    #[error(transparent)]
    Map(#[from] MapError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write CSV table {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Workflow phase '{phase}' failed: {reason}")]
    PhaseFailed { phase: &'static str, reason: String },
}
