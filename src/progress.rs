use crate::engine::PipelineStage;

/// Trait for reporting pipeline progress.
///
/// The CLI implements it with indicatif; tests use `SilentReporter`.
/// All methods have default no-op implementations.
pub trait ProgressReporter: Send + Sync {
    fn on_stage_start(&self, _stage: PipelineStage, _total_units: Option<usize>) {}
    fn on_stage_skipped(&self, _stage: PipelineStage, _reason: &str) {}
    fn on_stage_resumed(&self, _stage: PipelineStage, _from_unit: usize) {}
    fn on_unit_progress(&self, _stage: PipelineStage, _done: usize, _current: &str) {}
    fn on_stage_complete(&self, _stage: PipelineStage, _units: usize, _duration_secs: f64) {}
    fn on_deletion(&self, _path: &str, _reason: &str, _simulated: bool) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
