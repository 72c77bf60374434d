use std::path::PathBuf;
use thiserror::Error;

use crate::engine::PipelineStage;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Batch comparison could not execute. Distinct from "no matches found".
    #[error("Similarity oracle unavailable: {reason}")]
    OracleUnavailable { reason: String },

    #[error("Similarity oracle failed on {}: {reason}", file.display())]
    Oracle { file: PathBuf, reason: String },

    #[error("Cannot read directory {}: {source}", path.display())]
    UnreadableDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted checkpoint or index is unreadable. The stage must be reset.
    #[error("Corrupt pipeline state in '{record}': {reason}")]
    StateCorruption { record: String, reason: String },

    #[error("State directory is locked by another run ({})", path.display())]
    StateLocked { path: PathBuf },

    #[error("State store error: {0}")]
    Store(String),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            Error::Stage { .. } => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The failure underneath any stage wrapping.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}
