use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::cancel::CancelToken;
use crate::checkpoint::Checkpoint;
use crate::config::AppConfig;
use crate::error::Error;
use crate::executor::{AuditLog, DeletionExecutor, DeletionSummary};
use crate::filter::{CandidateFilter, CandidateList, DeletionCandidate};
use crate::oracle::{self, HashIndex, IndexBuild, SimilarityOracle};
use crate::parser::MatchParser;
use crate::progress::ProgressReporter;
use crate::store::{atomic, FileStateStore, StateLock, StateStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Idle,
    IndexingReference,
    IndexingCandidates,
    Comparing,
    Filtering,
    Deleting,
    Done,
    Aborted,
}

impl PipelineStage {
    /// Stages that own durable output, in execution order.
    pub const WORKING: [PipelineStage; 5] = [
        PipelineStage::IndexingReference,
        PipelineStage::IndexingCandidates,
        PipelineStage::Comparing,
        PipelineStage::Filtering,
        PipelineStage::Deleting,
    ];

    /// Prefix for this stage's records in the state store.
    pub fn key(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::IndexingReference => "reference",
            PipelineStage::IndexingCandidates => "candidates",
            PipelineStage::Comparing => "compare",
            PipelineStage::Filtering => "filter",
            PipelineStage::Deleting => "delete",
            PipelineStage::Done => "done",
            PipelineStage::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Idle => "idle",
            PipelineStage::IndexingReference => "indexing reference set",
            PipelineStage::IndexingCandidates => "indexing candidate set",
            PipelineStage::Comparing => "comparing",
            PipelineStage::Filtering => "filtering",
            PipelineStage::Deleting => "deleting",
            PipelineStage::Done => "done",
            PipelineStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonMode {
    /// Report reused from an earlier run.
    Cached,
    Batch,
    /// Batch form unavailable; one oracle call per candidate file.
    PerFile,
}

/// File layout inside the state directory.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub state_dir: PathBuf,
    pub reference_index: PathBuf,
    pub candidate_index: PathBuf,
    pub report: PathBuf,
    pub partial_report: PathBuf,
    pub candidates: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
            reference_index: state_dir.join("reference.idx"),
            candidate_index: state_dir.join("candidates.idx"),
            report: state_dir.join("report.txt"),
            partial_report: state_dir.join("report.partial"),
            candidates: state_dir.join("candidates.tsv"),
        }
    }
}

#[derive(Debug)]
pub struct PipelineOutcome {
    /// `Done`, or the stage that was interrupted.
    pub final_stage: PipelineStage,
    pub interrupted: bool,
    pub comparison: Option<ComparisonMode>,
    pub reference_files: usize,
    pub candidate_files: usize,
    pub candidates: Vec<DeletionCandidate>,
    pub deletion: DeletionSummary,
    pub elapsed: Duration,
}

impl PipelineOutcome {
    fn new() -> Self {
        Self {
            final_stage: PipelineStage::Idle,
            interrupted: false,
            comparison: None,
            reference_files: 0,
            candidate_files: 0,
            candidates: Vec::new(),
            deletion: DeletionSummary::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_done(&self) -> bool {
        self.final_stage == PipelineStage::Done
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageStatus {
    pub stage: PipelineStage,
    pub output: Option<PathBuf>,
    pub complete: bool,
    pub checkpoint: Option<usize>,
}

pub struct Pipeline<O: SimilarityOracle> {
    config: AppConfig,
    oracle: O,
    store: Box<dyn StateStore>,
    paths: StatePaths,
    cancel: CancelToken,
    parser: MatchParser,
}

impl<O: SimilarityOracle> Pipeline<O> {
    pub fn new(config: AppConfig, oracle: O) -> Result<Self, Error> {
        let store = FileStateStore::open(&config.state_dir)?;
        let paths = StatePaths::new(&config.state_dir);
        Ok(Self {
            config,
            oracle,
            store: Box::new(store),
            paths,
            cancel: CancelToken::new(),
            parser: MatchParser::default(),
        })
    }

    pub fn with_store(mut self, store: Box<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_parser(mut self, parser: MatchParser) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn paths(&self) -> &StatePaths {
        &self.paths
    }

    /// Run every stage, reusing whatever earlier runs completed:
    /// index reference set → index candidate set → compare → filter → delete.
    pub fn run(&self, reporter: &dyn ProgressReporter) -> Result<PipelineOutcome, Error> {
        self.config.validate()?;
        let started = Instant::now();
        let _lock = StateLock::acquire(&self.paths.state_dir)?;
        let mut outcome = PipelineOutcome::new();
        info!(
            "Starting {} run: reference {} / candidates {} (threshold {}, {})",
            self.config.mode,
            self.config.reference_dir.display(),
            self.config.candidate_dir.display(),
            self.config.threshold,
            self.config.match_policy,
        );

        self.invalidate_stale_state()?;

        let stage = PipelineStage::IndexingReference;
        match self.index_stage(stage, reporter).map_err(|e| e.in_stage(stage))? {
            Some(index) => outcome.reference_files = index.len(),
            None => return Ok(interrupted(outcome, stage, started)),
        }

        let stage = PipelineStage::IndexingCandidates;
        match self.index_stage(stage, reporter).map_err(|e| e.in_stage(stage))? {
            Some(index) => outcome.candidate_files = index.len(),
            None => return Ok(interrupted(outcome, stage, started)),
        }

        let stage = PipelineStage::Comparing;
        match self.compare_stage(reporter).map_err(|e| e.in_stage(stage))? {
            Some(mode) => outcome.comparison = Some(mode),
            None => return Ok(interrupted(outcome, stage, started)),
        }

        let stage = PipelineStage::Filtering;
        match self.filter_stage(reporter).map_err(|e| e.in_stage(stage))? {
            Some(candidates) => outcome.candidates = candidates,
            None => return Ok(interrupted(outcome, stage, started)),
        }

        let stage = PipelineStage::Deleting;
        let deletion = self
            .delete_stage(&outcome.candidates, reporter)
            .map_err(|e| e.in_stage(stage))?;
        let stopped = deletion.interrupted;
        outcome.deletion = deletion;
        if stopped {
            return Ok(interrupted(outcome, stage, started));
        }

        outcome.final_stage = PipelineStage::Done;
        outcome.elapsed = started.elapsed();
        info!(
            "Run complete in {:.2}s: {} candidates, {} deleted, {} simulated",
            outcome.elapsed.as_secs_f64(),
            outcome.candidates.len(),
            outcome.deletion.deleted,
            outcome.deletion.simulated,
        );
        Ok(outcome)
    }

    /// Drop all pipeline state so the next run starts from scratch.
    /// The audit log is never touched.
    pub fn reset(&self) -> Result<(), Error> {
        let _lock = StateLock::acquire(&self.paths.state_dir)?;
        self.clear_from(PipelineStage::IndexingReference)?;
        info!("Pipeline state cleared in {}", self.paths.state_dir.display());
        Ok(())
    }

    pub fn status(&self) -> Result<Vec<StageStatus>, Error> {
        let mut out = Vec::new();
        for stage in PipelineStage::WORKING {
            let output = self.output_of(stage).map(Path::to_path_buf);
            let checkpoint = match stage {
                PipelineStage::Comparing | PipelineStage::Filtering | PipelineStage::Deleting => {
                    let cp = Checkpoint::new(self.store.as_ref(), stage.key());
                    if cp.is_active()? {
                        Some(cp.load()?)
                    } else {
                        None
                    }
                }
                _ => None,
            };
            let complete = match stage {
                PipelineStage::IndexingReference => {
                    atomic::is_non_empty(&self.paths.reference_index)
                }
                PipelineStage::IndexingCandidates => {
                    atomic::is_non_empty(&self.paths.candidate_index)
                }
                PipelineStage::Comparing => self.report_complete()?,
                PipelineStage::Filtering => self.candidates_complete()?,
                _ => false,
            };
            out.push(StageStatus {
                stage,
                output,
                complete,
                checkpoint,
            });
        }
        Ok(out)
    }

    fn output_of(&self, stage: PipelineStage) -> Option<&Path> {
        match stage {
            PipelineStage::IndexingReference => Some(&self.paths.reference_index),
            PipelineStage::IndexingCandidates => Some(&self.paths.candidate_index),
            PipelineStage::Comparing => Some(&self.paths.report),
            PipelineStage::Filtering => Some(&self.paths.candidates),
            _ => None,
        }
    }

    fn marker_key(stage: PipelineStage) -> String {
        match stage {
            PipelineStage::IndexingReference | PipelineStage::IndexingCandidates => {
                format!("{}.source", stage.key())
            }
            _ => format!("{}.complete", stage.key()),
        }
    }

    fn source_dir(&self, stage: PipelineStage) -> &Path {
        if stage == PipelineStage::IndexingReference {
            &self.config.reference_dir
        } else {
            &self.config.candidate_dir
        }
    }

    fn filter_params(&self) -> String {
        format!(
            "threshold={} policy={}",
            self.config.threshold, self.config.match_policy
        )
    }

    /// Remove the durable output of `stage` and of every later stage.
    fn clear_from(&self, stage: PipelineStage) -> Result<(), Error> {
        let first = PipelineStage::WORKING
            .iter()
            .position(|s| *s == stage)
            .unwrap_or(0);
        for stage in &PipelineStage::WORKING[first..] {
            debug!("Clearing state for stage {}", stage);
            if let Some(output) = self.output_of(*stage) {
                atomic::remove_if_exists(output)?;
            }
            if *stage == PipelineStage::Comparing {
                atomic::remove_if_exists(&self.paths.partial_report)?;
            }
            if *stage != PipelineStage::Deleting {
                self.store.clear(&Self::marker_key(*stage))?;
            }
            Checkpoint::new(self.store.as_ref(), stage.key()).clear()?;
        }
        Ok(())
    }

    /// State built from different inputs or parameters is discarded together
    /// with everything derived from it.
    fn invalidate_stale_state(&self) -> Result<(), Error> {
        for stage in [
            PipelineStage::IndexingReference,
            PipelineStage::IndexingCandidates,
        ] {
            let current = self.source_dir(stage).display().to_string();
            if let Some(recorded) = self.store.get(&Self::marker_key(stage))? {
                if recorded.trim() != current {
                    info!(
                        "{} changed from {} to {}; discarding its index",
                        stage, recorded, current
                    );
                    atomic::remove_if_exists(self.output_of(stage).unwrap_or(Path::new("")))?;
                    self.store.clear(&Self::marker_key(stage))?;
                    self.clear_from(PipelineStage::Comparing)?;
                }
            }
        }

        let marker = Self::marker_key(PipelineStage::Filtering);
        if let Some(recorded) = self.store.get(&marker)? {
            if recorded.trim() != self.filter_params() {
                info!(
                    "Filter parameters changed ({} -> {}); re-filtering",
                    recorded.trim(),
                    self.filter_params()
                );
                self.clear_from(PipelineStage::Filtering)?;
            }
        }
        Ok(())
    }

    fn index_stage(
        &self,
        stage: PipelineStage,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<HashIndex>, Error> {
        let index_path = self.output_of(stage).unwrap_or(Path::new(""));
        let directory = self.source_dir(stage);
        info!("Stage: {}", stage);

        let build = oracle::build_index(
            &self.oracle,
            directory,
            index_path,
            &self.config.ignore_patterns,
            &self.cancel,
            reporter,
            stage,
        )?;

        let index = match build {
            IndexBuild::Cached(index) => {
                reporter.on_stage_skipped(stage, "index already present");
                index
            }
            IndexBuild::Built(index) => {
                // a fresh index makes any earlier comparison meaningless
                self.clear_from(PipelineStage::Comparing)?;
                index
            }
            IndexBuild::Interrupted { processed } => {
                info!("{} interrupted after {} files", stage, processed);
                return Ok(None);
            }
        };

        self.store
            .set(&Self::marker_key(stage), &directory.display().to_string())?;
        if index.is_empty() {
            warn!("{}: no files under {}", stage, directory.display());
        } else {
            info!("{}: {} entries", stage, index.len());
        }
        Ok(Some(index))
    }

    fn report_complete(&self) -> Result<bool, Error> {
        let cp = Checkpoint::new(self.store.as_ref(), PipelineStage::Comparing.key());
        if cp.is_active()? || !self.paths.report.exists() {
            return Ok(false);
        }
        Ok(atomic::is_non_empty(&self.paths.report)
            || self
                .store
                .get(&Self::marker_key(PipelineStage::Comparing))?
                .is_some())
    }

    fn compare_stage(&self, reporter: &dyn ProgressReporter) -> Result<Option<ComparisonMode>, Error> {
        let stage = PipelineStage::Comparing;
        info!("Stage: {}", stage);

        if self.report_complete()? {
            reporter.on_stage_skipped(stage, "comparison report already present");
            return Ok(Some(ComparisonMode::Cached));
        }

        let checkpoint = Checkpoint::new(self.store.as_ref(), stage.key());
        let mode = if checkpoint.is_active()? {
            // an earlier run already fell back; keep going file by file
            self.compare_per_file(&checkpoint, reporter)?
        } else {
            let start = Instant::now();
            reporter.on_stage_start(stage, None);
            match self
                .oracle
                .compare_indexes(&self.paths.reference_index, &self.paths.candidate_index)
            {
                Ok(report) => {
                    atomic::write_atomic(&self.paths.report, report.as_bytes())?;
                    reporter.on_stage_complete(
                        stage,
                        report.lines().count(),
                        start.elapsed().as_secs_f64(),
                    );
                    Some(ComparisonMode::Batch)
                }
                Err(Error::OracleUnavailable { reason }) if self.config.fallback => {
                    warn!(
                        "Batch comparison unavailable ({}); falling back to per-file comparison",
                        reason
                    );
                    self.compare_per_file(&checkpoint, reporter)?
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(mode) = mode {
            self.store
                .set(&Self::marker_key(stage), &format!("{:?}", mode))?;
            self.clear_from(PipelineStage::Filtering)?;
        }
        Ok(mode)
    }

    fn compare_per_file(
        &self,
        checkpoint: &Checkpoint<'_>,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<ComparisonMode>, Error> {
        let stage = PipelineStage::Comparing;
        let start = Instant::now();
        let candidates = HashIndex::read(&self.paths.candidate_index)?;
        let resume_at = checkpoint.load()?;
        if resume_at > candidates.len() {
            return Err(Error::StateCorruption {
                record: checkpoint.key().to_string(),
                reason: format!(
                    "checkpoint {} exceeds {} indexed candidates",
                    resume_at,
                    candidates.len()
                ),
            });
        }

        reporter.on_stage_start(stage, Some(candidates.len()));
        if resume_at == 0 {
            atomic::remove_if_exists(&self.paths.partial_report)?;
        } else {
            info!("Resuming per-file comparison at file {}", resume_at + 1);
            reporter.on_stage_resumed(stage, resume_at);
        }

        for (i, entry) in candidates.entries.iter().enumerate().skip(resume_at) {
            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            match self
                .oracle
                .compare_single(&self.paths.reference_index, Path::new(&entry.path))
            {
                Ok(raw) => {
                    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
                        atomic::append_line_synced(&self.paths.partial_report, line)?;
                    }
                }
                Err(e) => warn!("Comparison failed for {}: {}", entry.path, e),
            }
            checkpoint.advance(i)?;
            reporter.on_unit_progress(stage, i + 1, &entry.path);
        }

        if self.paths.partial_report.exists() {
            atomic::promote(&self.paths.partial_report, &self.paths.report)?;
        } else if !self.paths.report.exists() {
            // no candidate matched anything
            atomic::write_atomic(&self.paths.report, b"")?;
        }
        checkpoint.clear()?;
        reporter.on_stage_complete(stage, candidates.len(), start.elapsed().as_secs_f64());
        Ok(Some(ComparisonMode::PerFile))
    }

    fn candidates_complete(&self) -> Result<bool, Error> {
        let cp = Checkpoint::new(self.store.as_ref(), PipelineStage::Filtering.key());
        if cp.is_active()? || !CandidateList::new(&self.paths.candidates).exists() {
            return Ok(false);
        }
        Ok(self
            .store
            .get(&Self::marker_key(PipelineStage::Filtering))?
            .map(|params| params.trim() == self.filter_params())
            .unwrap_or(false))
    }

    fn filter_stage(
        &self,
        reporter: &dyn ProgressReporter,
    ) -> Result<Option<Vec<DeletionCandidate>>, Error> {
        let stage = PipelineStage::Filtering;
        info!("Stage: {}", stage);
        let list = CandidateList::new(&self.paths.candidates);

        if self.candidates_complete()? {
            reporter.on_stage_skipped(stage, "candidate list already present");
            return Ok(Some(list.load()?));
        }

        let start = Instant::now();
        let checkpoint = Checkpoint::new(self.store.as_ref(), stage.key());
        let resume_at = checkpoint.load()?;
        let report = fs::read_to_string(&self.paths.report)?;
        let lines: Vec<&str> = report.lines().collect();
        if resume_at > lines.len() {
            return Err(Error::StateCorruption {
                record: checkpoint.key().to_string(),
                reason: format!(
                    "checkpoint {} exceeds {} report lines",
                    resume_at,
                    lines.len()
                ),
            });
        }

        reporter.on_stage_start(stage, Some(lines.len()));
        if resume_at == 0 {
            list.reset()?;
        } else {
            info!("Resuming filtering at report line {}", resume_at + 1);
            reporter.on_stage_resumed(stage, resume_at);
        }

        // only files the candidate index knows about may become candidates
        let indexed: HashSet<String> = HashIndex::read(&self.paths.candidate_index)?
            .entries
            .into_iter()
            .map(|entry| entry.path)
            .collect();

        let mut filter = CandidateFilter::new(self.config.threshold, self.config.match_policy);
        let mut skipped = 0usize;
        for (i, line) in lines.iter().enumerate() {
            let record = self.parser.parse(line).filter(|record| {
                let known = indexed.contains(&record.candidate_path);
                if !known {
                    debug!(
                        "Ignoring match for {}: not in the candidate set",
                        record.candidate_path
                    );
                }
                known
            });

            if i < resume_at {
                // replay so first/best decisions match an uninterrupted run
                if let Some(record) = record {
                    filter.offer(&record);
                }
                continue;
            }

            if self.cancel.is_cancelled() {
                return Ok(None);
            }

            match record {
                Some(record) => {
                    if let Some(candidate) = filter.offer(&record) {
                        trace!("Candidate {} ({})", candidate.path, candidate.reason);
                        list.append(&candidate)?;
                    }
                }
                None => {
                    if !line.trim().is_empty() {
                        skipped += 1;
                        trace!("Skipping unparseable line {}: {}", i + 1, line);
                    }
                }
            }
            checkpoint.advance(i)?;
            reporter.on_unit_progress(stage, i + 1, line);
        }

        if skipped > 0 {
            debug!("{} report lines were not match records", skipped);
        }
        self.store
            .set(&Self::marker_key(stage), &self.filter_params())?;
        checkpoint.clear()?;
        Checkpoint::new(self.store.as_ref(), PipelineStage::Deleting.key()).clear()?;

        let candidates = list.load()?;
        reporter.on_stage_complete(stage, candidates.len(), start.elapsed().as_secs_f64());
        info!(
            "{} deletion candidates written to {}",
            candidates.len(),
            list.path().display()
        );
        Ok(Some(candidates))
    }

    fn delete_stage(
        &self,
        candidates: &[DeletionCandidate],
        reporter: &dyn ProgressReporter,
    ) -> Result<DeletionSummary, Error> {
        let stage = PipelineStage::Deleting;
        info!("Stage: {} ({})", stage, self.config.mode);
        let start = Instant::now();
        reporter.on_stage_start(stage, Some(candidates.len()));

        let executor = DeletionExecutor::new(
            AuditLog::new(&self.config.audit_log),
            self.config.mode,
            reporter,
        )
        .within(&self.config.candidate_dir);
        let summary = if self.config.mode.is_simulate() {
            executor.apply(candidates, None, &self.cancel)?
        } else {
            let checkpoint = Checkpoint::new(self.store.as_ref(), stage.key());
            let summary = executor.apply(candidates, Some(&checkpoint), &self.cancel)?;
            if !summary.interrupted {
                checkpoint.clear()?;
            }
            summary
        };

        reporter.on_stage_complete(
            stage,
            summary.deleted + summary.simulated,
            start.elapsed().as_secs_f64(),
        );
        Ok(summary)
    }
}

fn interrupted(
    mut outcome: PipelineOutcome,
    stage: PipelineStage,
    started: Instant,
) -> PipelineOutcome {
    info!("Interrupted during {}; state saved for resume", stage);
    outcome.final_stage = stage;
    outcome.interrupted = true;
    outcome.elapsed = started.elapsed();
    outcome
}
