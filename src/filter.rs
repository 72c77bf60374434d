use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::config::MatchPolicy;
use crate::error::Error;
use crate::parser::MatchRecord;
use crate::store::atomic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionCandidate {
    pub path: String,
    pub reason: String,
}

impl DeletionCandidate {
    pub fn from_match(record: &MatchRecord) -> Self {
        Self {
            path: record.candidate_path.clone(),
            reason: format!(
                "reference: {} score: {}%",
                record.reference_path, record.score
            ),
        }
    }
}

/// Streaming threshold filter.
///
/// Emits at most one candidate per path under `FirstMatch`. Under `BestMatch`
/// a later, strictly higher score for a known path emits a superseding
/// candidate for the same path.
#[derive(Debug)]
pub struct CandidateFilter {
    threshold: u8,
    policy: MatchPolicy,
    best: HashMap<String, u8>,
}

impl CandidateFilter {
    pub fn new(threshold: u8, policy: MatchPolicy) -> Self {
        Self {
            threshold,
            policy,
            best: HashMap::new(),
        }
    }

    pub fn offer(&mut self, record: &MatchRecord) -> Option<DeletionCandidate> {
        if record.score < self.threshold {
            return None;
        }

        match (self.best.get(&record.candidate_path), self.policy) {
            (None, _) => {}
            (Some(_), MatchPolicy::FirstMatch) => return None,
            (Some(&seen), MatchPolicy::BestMatch) if record.score <= seen => return None,
            (Some(_), MatchPolicy::BestMatch) => {
                trace!(
                    "{} superseded by score {}",
                    record.candidate_path,
                    record.score
                );
            }
        }

        self.best
            .insert(record.candidate_path.clone(), record.score);
        Some(DeletionCandidate::from_match(record))
    }
}

/// Whole-sequence form of `CandidateFilter`: one candidate per distinct path,
/// in first-encounter order.
pub fn filter<I>(matches: I, threshold: u8, policy: MatchPolicy) -> Vec<DeletionCandidate>
where
    I: IntoIterator<Item = MatchRecord>,
{
    let mut filter = CandidateFilter::new(threshold, policy);
    let mut out = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in matches {
        if let Some(candidate) = filter.offer(&record) {
            collapse_into(&mut out, &mut positions, candidate);
        }
    }
    out
}

fn collapse_into(
    out: &mut Vec<DeletionCandidate>,
    positions: &mut HashMap<String, usize>,
    candidate: DeletionCandidate,
) {
    match positions.get(&candidate.path) {
        Some(&i) => out[i] = candidate,
        None => {
            positions.insert(candidate.path.clone(), out.len());
            out.push(candidate);
        }
    }
}

/// Durable, append-only `path<TAB>reason` list.
#[derive(Debug, Clone)]
pub struct CandidateList {
    path: PathBuf,
}

impl CandidateList {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Append one candidate and fsync before returning.
    pub fn append(&self, candidate: &DeletionCandidate) -> Result<(), Error> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_writer(Vec::new());
        writer.write_record([&candidate.path, &candidate.reason])?;
        let line = writer
            .into_inner()
            .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        f.write_all(&line)?;
        f.flush()?;
        f.sync_all()?;
        Ok(())
    }

    /// Create an empty list, discarding any previous one.
    pub fn reset(&self) -> Result<(), Error> {
        atomic::write_atomic(&self.path, b"")?;
        Ok(())
    }

    /// Read back the list. A later line for the same path replaces the earlier
    /// one while keeping the earlier position.
    pub fn load(&self) -> Result<Vec<DeletionCandidate>, Error> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_reader(file);

        let mut out = Vec::new();
        let mut positions = HashMap::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| Error::StateCorruption {
                record: self.path.display().to_string(),
                reason: format!("line {}: {}", line + 1, e),
            })?;
            match (row.get(0), row.get(1)) {
                (Some(path), Some(reason)) if row.len() == 2 && !path.is_empty() => {
                    collapse_into(
                        &mut out,
                        &mut positions,
                        DeletionCandidate {
                            path: path.to_string(),
                            reason: reason.to_string(),
                        },
                    );
                }
                _ => {
                    return Err(Error::StateCorruption {
                        record: self.path.display().to_string(),
                        reason: format!("line {}: expected path and reason", line + 1),
                    })
                }
            }
        }
        debug!(
            "Loaded {} candidates from {}",
            out.len(),
            self.path.display()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(score: u8, reference: &str, candidate: &str) -> MatchRecord {
        MatchRecord {
            score,
            reference_path: reference.to_string(),
            candidate_path: candidate.to_string(),
        }
    }

    #[test]
    fn test_threshold_boundary() {
        for score in [0u8, 50, 89, 90, 91, 100] {
            let out = filter(vec![m(score, "/ref/a", "/rec/b")], 90, MatchPolicy::FirstMatch);
            assert_eq!(out.len(), usize::from(score >= 90), "score {}", score);
        }
    }

    #[test]
    fn test_reason_text() {
        let out = filter(
            vec![m(95, "/ref/a.jpg", "/rec/b.jpg")],
            90,
            MatchPolicy::FirstMatch,
        );
        assert_eq!(
            out,
            vec![DeletionCandidate {
                path: "/rec/b.jpg".to_string(),
                reason: "reference: /ref/a.jpg score: 95%".to_string(),
            }]
        );
    }

    #[test]
    fn test_first_match_wins() {
        let matches = vec![
            m(91, "/ref/a", "/rec/x"),
            m(99, "/ref/b", "/rec/x"),
            m(95, "/ref/c", "/rec/y"),
        ];
        let out = filter(matches, 90, MatchPolicy::FirstMatch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].reason, "reference: /ref/a score: 91%");
        assert_eq!(out[1].path, "/rec/y");
    }

    #[test]
    fn test_best_match_wins_in_place() {
        let matches = vec![
            m(91, "/ref/a", "/rec/x"),
            m(95, "/ref/c", "/rec/y"),
            m(99, "/ref/b", "/rec/x"),
            m(99, "/ref/d", "/rec/x"),
        ];
        let out = filter(matches, 90, MatchPolicy::BestMatch);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].path, "/rec/x");
        assert_eq!(out[0].reason, "reference: /ref/b score: 99%");
        assert_eq!(out[1].path, "/rec/y");
    }

    #[test]
    fn test_candidate_list_append_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let list = CandidateList::new(tmp.path().join("candidates.tsv"));
        assert!(list.load().unwrap().is_empty());

        let first = DeletionCandidate {
            path: "/rec/b c.jpg".to_string(),
            reason: "reference: /ref/a.jpg score: 91%".to_string(),
        };
        let better = DeletionCandidate {
            path: "/rec/b c.jpg".to_string(),
            reason: "reference: /ref/z.jpg score: 97%".to_string(),
        };
        let other = DeletionCandidate {
            path: "/rec/d.jpg".to_string(),
            reason: "reference: /ref/d.jpg score: 90%".to_string(),
        };
        list.append(&first).unwrap();
        list.append(&other).unwrap();
        list.append(&better).unwrap();

        assert_eq!(list.load().unwrap(), vec![better, other]);
    }

    #[test]
    fn test_candidate_list_rejects_malformed_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("candidates.tsv");
        std::fs::write(&path, "only-a-path\n").unwrap();
        assert!(matches!(
            CandidateList::new(&path).load(),
            Err(Error::StateCorruption { .. })
        ));
    }
}
