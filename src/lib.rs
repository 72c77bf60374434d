pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod oracle;
pub mod parser;
pub mod progress;
pub mod scanner;
pub mod store;

pub use cancel::CancelToken;
pub use config::{AppConfig, MatchPolicy, RunMode};
pub use engine::{ComparisonMode, Pipeline, PipelineOutcome, PipelineStage};
pub use error::Error;
pub use oracle::{SimilarityOracle, SsdeepOracle};
pub use progress::{ProgressReporter, SilentReporter};
