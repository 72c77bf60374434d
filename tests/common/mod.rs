#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use fuzzy_dedupe::oracle::HashIndex;
use fuzzy_dedupe::{CancelToken, Error, PipelineStage, ProgressReporter, SimilarityOracle};
use tempfile::TempDir;

/// Oracle stand-in with a fixed score table keyed by file name.
pub struct ScriptedOracle {
    scores: HashMap<(String, String), u8>,
    pub batch_available: bool,
    raw_lines: Vec<String>,
    pub fingerprints: Cell<usize>,
    pub batch_calls: Cell<usize>,
    pub single_calls: RefCell<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            batch_available: true,
            raw_lines: Vec::new(),
            fingerprints: Cell::new(0),
            batch_calls: Cell::new(0),
            single_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn score(mut self, reference: &str, candidate: &str, score: u8) -> Self {
        self.scores
            .insert((reference.to_string(), candidate.to_string()), score);
        self
    }

    /// Extra line appended verbatim to every batch report.
    pub fn raw_line(mut self, line: impl Into<String>) -> Self {
        self.raw_lines.push(line.into());
        self
    }

    pub fn without_batch(mut self) -> Self {
        self.batch_available = false;
        self
    }

    fn lines_for(&self, reference: &HashIndex, candidate_path: &str) -> Vec<String> {
        let candidate_name = file_name(candidate_path);
        reference
            .entries
            .iter()
            .filter_map(|r| {
                self.scores
                    .get(&(file_name(&r.path), candidate_name.clone()))
                    .map(|score| format!("{} matches {} ({})", r.path, candidate_path, score))
            })
            .collect()
    }
}

impl SimilarityOracle for ScriptedOracle {
    fn fingerprint(&self, file: &Path) -> Result<String, Error> {
        self.fingerprints.set(self.fingerprints.get() + 1);
        let len = fs::metadata(file)?.len();
        Ok(format!("3:{}:{}", file_name(&file.to_string_lossy()), len))
    }

    fn compare_indexes(
        &self,
        reference_index: &Path,
        candidate_index: &Path,
    ) -> Result<String, Error> {
        self.batch_calls.set(self.batch_calls.get() + 1);
        if !self.batch_available {
            return Err(Error::OracleUnavailable {
                reason: "batch mode not supported".to_string(),
            });
        }
        let reference = HashIndex::read(reference_index)?;
        let candidates = HashIndex::read(candidate_index)?;
        let mut out = String::from("# scripted comparison report\n");
        for candidate in &candidates.entries {
            for line in self.lines_for(&reference, &candidate.path) {
                out.push_str(&line);
                out.push('\n');
            }
        }
        for line in &self.raw_lines {
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    fn compare_single(&self, reference_index: &Path, file: &Path) -> Result<String, Error> {
        let path = file.to_string_lossy().into_owned();
        self.single_calls.borrow_mut().push(path.clone());
        let reference = HashIndex::read(reference_index)?;
        Ok(self.lines_for(&reference, &path).join("\n"))
    }
}

/// Trips the cancel token once `stage` has completed `after` units.
pub struct CancelAfter {
    pub token: CancelToken,
    pub stage: PipelineStage,
    pub after: usize,
}

impl ProgressReporter for CancelAfter {
    fn on_unit_progress(&self, stage: PipelineStage, done: usize, _current: &str) {
        if stage == self.stage && done >= self.after {
            self.token.cancel();
        }
    }
}

pub fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Temp layout:
///   ref/       reference files
///   rec/       recovered candidates
///   state/     pipeline state
pub struct Fixture {
    pub tmp: TempDir,
    pub reference: PathBuf,
    pub recovered: PathBuf,
    pub state: PathBuf,
}

impl Fixture {
    pub fn new(reference_files: &[&str], recovered_files: &[&str]) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let reference = tmp.path().join("ref");
        let recovered = tmp.path().join("rec");
        let state = tmp.path().join("state");
        fs::create_dir_all(&reference).unwrap();
        fs::create_dir_all(&recovered).unwrap();
        for name in reference_files {
            fs::write(reference.join(name), format!("reference {}", name)).unwrap();
        }
        for name in recovered_files {
            fs::write(recovered.join(name), format!("recovered {}", name)).unwrap();
        }
        Self {
            tmp,
            reference,
            recovered,
            state,
        }
    }

    pub fn reference_path(&self, name: &str) -> String {
        self.reference.join(name).to_string_lossy().into_owned()
    }

    pub fn recovered_path(&self, name: &str) -> String {
        self.recovered.join(name).to_string_lossy().into_owned()
    }

    pub fn audit_log(&self) -> PathBuf {
        self.tmp.path().join("deletions.log")
    }

    pub fn audit_lines(&self) -> Vec<String> {
        fs::read_to_string(self.audit_log())
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
