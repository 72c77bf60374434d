use colored::*;
use fuzzy_dedupe::{PipelineStage, ProgressReporter};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

const TICKS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Stages with a known unit count: progress bar
/// - Batch comparison (one long oracle call): spinner
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn println(&self, line: String) {
        match self.bar.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(pb) => pb.println(line),
                None => eprintln!("{}", line),
            },
            Err(_) => eprintln!("{}", line),
        }
    }
}

impl ProgressReporter for CliReporter {
    fn on_stage_start(&self, stage: PipelineStage, total_units: Option<usize>) {
        let pb = match total_units {
            Some(total) => {
                let pb = ProgressBar::new(total as u64);
                pb.set_style(
                    ProgressStyle::with_template(
                        "  {spinner:.cyan} {msg} [{bar:30.cyan/dim}] {pos}/{len} ({eta} remaining)",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("━╸─")
                    .tick_chars(TICKS),
                );
                pb
            }
            None => {
                let pb = ProgressBar::new_spinner();
                pb.set_style(
                    ProgressStyle::with_template("  {spinner:.cyan} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner())
                        .tick_chars(TICKS),
                );
                pb
            }
        };
        pb.set_message(stage.to_string());
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_stage_skipped(&self, stage: PipelineStage, reason: &str) {
        eprintln!("  {} {}: skipped, {}", "↷".yellow(), stage, reason);
    }

    fn on_stage_resumed(&self, stage: PipelineStage, from_unit: usize) {
        self.println(format!(
            "  {} {}: resuming after {} completed units",
            "↻".cyan(),
            stage,
            from_unit
        ));
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_position(from_unit as u64);
            }
        }
    }

    fn on_unit_progress(&self, _stage: PipelineStage, done: usize, _current: &str) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_position(done as u64);
            }
        }
    }

    fn on_stage_complete(&self, stage: PipelineStage, units: usize, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} {} complete: {} units in {:.2}s",
            "✓".green(),
            stage,
            units,
            duration_secs
        );
    }

    fn on_deletion(&self, path: &str, reason: &str, simulated: bool) {
        let label = if simulated {
            "[simulate] DELETE".yellow()
        } else {
            "Deleted".red()
        };
        self.println(format!("   {} {} ({})", label, path, reason.dimmed()));
    }
}
