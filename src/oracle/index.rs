use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::SimilarityOracle;
use crate::cancel::CancelToken;
use crate::engine::PipelineStage;
use crate::error::Error;
use crate::progress::ProgressReporter;
use crate::scanner;
use crate::store::atomic;

/// Header line of the oracle's native signature file format.
pub const INDEX_HEADER: &str = "ssdeep,1.1--blocksize:hash:hash,filename";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub fingerprint: String,
    pub path: String,
}

/// Fingerprints for one directory tree, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashIndex {
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub enum IndexBuild {
    /// A complete index was already on disk.
    Cached(HashIndex),
    Built(HashIndex),
    /// Cancelled before completion; nothing was persisted.
    Interrupted { processed: usize },
}

impl HashIndex {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `fingerprint,"path"` lines under the signature-file header.
    /// Quotes inside a path are doubled so `read` returns it unchanged.
    pub fn render(&self) -> Result<String, Error> {
        let mut out = String::with_capacity(64 * (self.entries.len() + 1));
        out.push_str(INDEX_HEADER);
        out.push('\n');
        for entry in &self.entries {
            let _ = writeln!(out, "{},{}", entry.fingerprint, quoted(&entry.path)?);
        }
        Ok(out)
    }

    pub fn write(&self, path: &Path) -> Result<(), Error> {
        atomic::write_atomic(path, self.render()?.as_bytes())?;
        Ok(())
    }

    /// Load a persisted index. Anything malformed is `StateCorruption`; a
    /// cached index is never partially trusted.
    pub fn read(path: &Path) -> Result<HashIndex, Error> {
        let record = path.display().to_string();
        let corrupt = |reason: String| Error::StateCorruption {
            record: record.clone(),
            reason,
        };

        let file = File::open(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(file);

        let header_ok = reader
            .headers()
            .map(|h| h.get(0) == Some("ssdeep"))
            .map_err(|e| corrupt(format!("unreadable header: {}", e)))?;
        if !header_ok {
            return Err(corrupt("missing signature header".to_string()));
        }

        let mut entries = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row.map_err(|e| corrupt(format!("row {}: {}", line + 2, e)))?;
            let (fingerprint, file_path) = match (row.get(0), row.get(1)) {
                (Some(f), Some(p)) if row.len() == 2 && !p.is_empty() => (f, p),
                _ => return Err(corrupt(format!("row {}: expected 2 fields", line + 2))),
            };
            if fingerprint.split(':').count() != 3 {
                return Err(corrupt(format!(
                    "row {}: malformed fingerprint '{}'",
                    line + 2,
                    fingerprint
                )));
            }
            entries.push(IndexEntry {
                fingerprint: fingerprint.to_string(),
                path: file_path.to_string(),
            });
        }

        Ok(HashIndex { entries })
    }
}

/// One always-quoted CSV field, without the record terminator.
fn quoted(field: &str) -> Result<String, Error> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record([field])?;
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?;
    let mut field = String::from_utf8_lossy(&bytes).into_owned();
    field.pop();
    Ok(field)
}

/// Fingerprint every file under `directory` into `index_path`.
///
/// An existing non-empty index is returned unchanged. Files the oracle cannot
/// fingerprint are left out of the index.
pub fn build_index(
    oracle: &dyn SimilarityOracle,
    directory: &Path,
    index_path: &Path,
    ignore_globs: &[String],
    cancel: &CancelToken,
    reporter: &dyn ProgressReporter,
    stage: PipelineStage,
) -> Result<IndexBuild, Error> {
    if atomic::is_non_empty(index_path) {
        debug!("Reusing cached index {}", index_path.display());
        return Ok(IndexBuild::Cached(HashIndex::read(index_path)?));
    }

    let start = Instant::now();
    let files = scanner::list_files(directory, ignore_globs)?;
    reporter.on_stage_start(stage, Some(files.len()));
    info!(
        "Fingerprinting {} files under {}",
        files.len(),
        directory.display()
    );

    let mut index = HashIndex::default();
    for (i, file) in files.iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(IndexBuild::Interrupted { processed: i });
        }

        let display = file.to_string_lossy();
        if display.contains(['\n', '\r']) {
            // the signature format is line based
            warn!("Skipping {}: line break in file name", file.display());
            reporter.on_unit_progress(stage, i + 1, &display);
            continue;
        }

        match oracle.fingerprint(file) {
            Ok(fingerprint) => index.entries.push(IndexEntry {
                fingerprint,
                path: file.to_string_lossy().into_owned(),
            }),
            Err(e) => warn!("Skipping {}: {}", file.display(), e),
        }
        reporter.on_unit_progress(stage, i + 1, &file.to_string_lossy());
    }

    index.write(index_path)?;
    reporter.on_stage_complete(stage, index.len(), start.elapsed().as_secs_f64());
    Ok(IndexBuild::Built(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ref.idx");
        let index = HashIndex {
            entries: vec![
                IndexEntry {
                    fingerprint: "3:abc:def".to_string(),
                    path: "/ref/a.jpg".to_string(),
                },
                IndexEntry {
                    fingerprint: "6:ghi:jkl".to_string(),
                    path: "/ref/with, comma.jpg".to_string(),
                },
            ],
        };
        index.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(INDEX_HEADER));
        assert!(text.contains("3:abc:def,\"/ref/a.jpg\""));
        assert_eq!(HashIndex::read(&path).unwrap(), index);
    }

    #[test]
    fn test_quotes_in_paths_survive() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ref.idx");
        let index = HashIndex {
            entries: vec![IndexEntry {
                fingerprint: "3:abc:def".to_string(),
                path: "/ref/say \"hi\".jpg".to_string(),
            }],
        };
        index.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("3:abc:def,\"/ref/say \"\"hi\"\".jpg\""));
        assert_eq!(HashIndex::read(&path).unwrap(), index);
    }

    #[test]
    fn test_read_rejects_garbage() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("bad.idx");
        std::fs::write(&path, "not an index\n").unwrap();
        assert!(matches!(
            HashIndex::read(&path),
            Err(Error::StateCorruption { .. })
        ));

        std::fs::write(&path, format!("{}\nnocolons,\"/x\"\n", INDEX_HEADER)).unwrap();
        assert!(matches!(
            HashIndex::read(&path),
            Err(Error::StateCorruption { .. })
        ));
    }
}
