use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelToken;
use crate::checkpoint::Checkpoint;
use crate::config::RunMode;
use crate::engine::PipelineStage;
use crate::error::Error;
use crate::filter::DeletionCandidate;
use crate::progress::ProgressReporter;
use crate::store::atomic;

/// Append-only `timestamp path reason` log of real deletions.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, deleted_path: &str, reason: &str) -> Result<(), Error> {
        let line = format!("{} {} {}", Utc::now().to_rfc3339(), deleted_path, reason);
        atomic::append_line_synced(&self.path, &line)?;
        Ok(())
    }

    pub fn last_line(&self) -> Result<Option<String>, Error> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_string)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn entry_count(&self) -> Result<usize, Error> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text.lines().filter(|l| !l.trim().is_empty()).count()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `line` records the deletion of `path` for `reason`, whatever its timestamp.
fn records(line: &str, path: &str, reason: &str) -> bool {
    line.split_once(' ')
        .map(|(_, rest)| {
            rest.len() == path.len() + 1 + reason.len()
                && rest.starts_with(path)
                && rest[path.len()..].starts_with(' ')
                && rest.ends_with(reason)
        })
        .unwrap_or(false)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionSummary {
    pub deleted: usize,
    pub simulated: usize,
    pub already_gone: usize,
    pub failed: usize,
    /// Outside the candidate directory; never touched.
    pub refused: usize,
    pub interrupted: bool,
}

pub struct DeletionExecutor<'a> {
    audit: AuditLog,
    mode: RunMode,
    reporter: &'a dyn ProgressReporter,
    root: Option<PathBuf>,
}

impl<'a> DeletionExecutor<'a> {
    pub fn new(audit: AuditLog, mode: RunMode, reporter: &'a dyn ProgressReporter) -> Self {
        Self {
            audit,
            mode,
            reporter,
            root: None,
        }
    }

    /// Refuse to touch anything that does not live under `root`.
    pub fn within(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn in_scope(&self, candidate: &DeletionCandidate) -> bool {
        let inside = self
            .root
            .as_deref()
            .map(|root| Path::new(&candidate.path).starts_with(root))
            .unwrap_or(true);
        if !inside {
            warn!(
                "Refusing to delete {}: outside the candidate directory",
                candidate.path
            );
        }
        inside
    }

    /// Work through `candidates` in order.
    ///
    /// In apply mode each deletion is logged before the file is removed, and
    /// the checkpoint (when given) advances only after both. A file that is
    /// already gone counts as resolved and is not logged again.
    pub fn apply(
        &self,
        candidates: &[DeletionCandidate],
        checkpoint: Option<&Checkpoint<'_>>,
        cancel: &CancelToken,
    ) -> Result<DeletionSummary, Error> {
        let mut summary = DeletionSummary::default();

        if self.mode.is_simulate() {
            for (i, candidate) in candidates.iter().enumerate() {
                if cancel.is_cancelled() {
                    summary.interrupted = true;
                    break;
                }
                if !self.in_scope(candidate) {
                    summary.refused += 1;
                    continue;
                }
                info!("[simulate] would delete {} ({})", candidate.path, candidate.reason);
                self.reporter
                    .on_deletion(&candidate.path, &candidate.reason, true);
                self.reporter
                    .on_unit_progress(PipelineStage::Deleting, i + 1, &candidate.path);
                summary.simulated += 1;
            }
            return Ok(summary);
        }

        let start = match checkpoint {
            Some(cp) => cp.load()?,
            None => 0,
        };
        if start > 0 {
            debug!("Resuming deletion at candidate {}", start);
            self.reporter.on_stage_resumed(PipelineStage::Deleting, start);
        }
        debug!("Recording deletions in {}", self.audit.path().display());
        let mut last_logged = self.audit.last_line()?;

        for (i, candidate) in candidates.iter().enumerate().skip(start) {
            if cancel.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let path = Path::new(&candidate.path);
            if !self.in_scope(candidate) {
                summary.refused += 1;
            } else if fs::symlink_metadata(path).is_err() {
                debug!("{} already gone", candidate.path);
                summary.already_gone += 1;
            } else {
                let logged = last_logged
                    .as_deref()
                    .map(|line| records(line, &candidate.path, &candidate.reason))
                    .unwrap_or(false);
                if !logged {
                    self.audit.append(&candidate.path, &candidate.reason)?;
                }
                last_logged = None;

                match atomic::remove_if_exists(path) {
                    Ok(true) => {
                        info!("Deleted {} ({})", candidate.path, candidate.reason);
                        self.reporter
                            .on_deletion(&candidate.path, &candidate.reason, false);
                        summary.deleted += 1;
                    }
                    Ok(false) => summary.already_gone += 1,
                    Err(e) => {
                        error!("Failed to delete {}: {}", candidate.path, e);
                        summary.failed += 1;
                    }
                }
            }

            if let Some(cp) = checkpoint {
                cp.advance(i)?;
            }
            self.reporter
                .on_unit_progress(PipelineStage::Deleting, i + 1, &candidate.path);
        }

        if summary.failed > 0 {
            warn!("{} deletions failed; see log above", summary.failed);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use crate::store::FileStateStore;

    fn candidate(path: &Path) -> DeletionCandidate {
        DeletionCandidate {
            path: path.to_string_lossy().into_owned(),
            reason: "reference: /ref/a.jpg score: 95%".to_string(),
        }
    }

    #[test]
    fn test_simulate_touches_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("b.jpg");
        fs::write(&file, "data").unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));

        let executor = DeletionExecutor::new(audit.clone(), RunMode::Simulate, &SilentReporter);
        let summary = executor
            .apply(&[candidate(&file)], None, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.simulated, 1);
        assert!(file.exists());
        assert!(!audit.path().exists());
    }

    #[test]
    fn test_apply_logs_then_deletes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("b.jpg");
        fs::write(&file, "data").unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));

        let executor = DeletionExecutor::new(audit.clone(), RunMode::Apply, &SilentReporter);
        let summary = executor
            .apply(&[candidate(&file)], None, &CancelToken::new())
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(!file.exists());
        let line = audit.last_line().unwrap().unwrap();
        assert!(records(
            &line,
            &file.to_string_lossy(),
            "reference: /ref/a.jpg score: 95%"
        ));
    }

    #[test]
    fn test_paths_outside_root_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let recovered = tmp.path().join("rec");
        let reference = tmp.path().join("ref");
        fs::create_dir_all(&recovered).unwrap();
        fs::create_dir_all(&reference).unwrap();
        let inside = recovered.join("b.jpg");
        let outside = reference.join("a.jpg");
        fs::write(&inside, "b").unwrap();
        fs::write(&outside, "a").unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));

        let executor =
            DeletionExecutor::new(audit.clone(), RunMode::Apply, &SilentReporter).within(&recovered);
        let summary = executor
            .apply(
                &[candidate(&outside), candidate(&inside)],
                None,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(summary.refused, 1);
        assert_eq!(summary.deleted, 1);
        assert!(outside.exists());
        assert!(!inside.exists());
        assert_eq!(audit.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));
        let executor = DeletionExecutor::new(audit.clone(), RunMode::Apply, &SilentReporter);
        let summary = executor
            .apply(
                &[candidate(&tmp.path().join("never-existed.jpg"))],
                None,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(summary.already_gone, 1);
        assert_eq!(audit.entry_count().unwrap(), 0);
    }

    #[test]
    fn test_crash_between_log_and_delete_does_not_relog() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("b.jpg");
        fs::write(&file, "data").unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));
        let c = candidate(&file);

        // logged, but the process died before remove_file
        audit.append(&c.path, &c.reason).unwrap();

        let store = FileStateStore::open(tmp.path().join("state")).unwrap();
        let checkpoint = Checkpoint::new(&store, "delete");
        let executor = DeletionExecutor::new(audit.clone(), RunMode::Apply, &SilentReporter);
        let summary = executor
            .apply(&[c.clone()], Some(&checkpoint), &CancelToken::new())
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(!file.exists());
        assert_eq!(audit.entry_count().unwrap(), 1);
        assert_eq!(checkpoint.load().unwrap(), 1);

        // and a second pass over the same list is a no-op
        let summary = executor
            .apply(&[c], None, &CancelToken::new())
            .unwrap();
        assert_eq!(summary.already_gone, 1);
        assert_eq!(audit.entry_count().unwrap(), 1);
    }

    #[test]
    fn test_resume_skips_checkpointed_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a.jpg");
        let b = tmp.path().join("b.jpg");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();
        let audit = AuditLog::new(tmp.path().join("audit.log"));

        let store = FileStateStore::open(tmp.path().join("state")).unwrap();
        let checkpoint = Checkpoint::new(&store, "delete");
        checkpoint.advance(0).unwrap();

        let executor = DeletionExecutor::new(audit.clone(), RunMode::Apply, &SilentReporter);
        let summary = executor
            .apply(&[candidate(&a), candidate(&b)], Some(&checkpoint), &CancelToken::new())
            .unwrap();

        assert_eq!(summary.deleted, 1);
        assert!(a.exists());
        assert!(!b.exists());
    }
}
