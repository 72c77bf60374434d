use glob::Pattern;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::Error;

/// Recursive, sorted listing of the regular files under `root`.
///
/// Order is by file name at every level so repeated runs see the same unit
/// sequence. Skips symlinks, 0-byte files and anything matching an ignore glob.
pub fn list_files(root: &Path, ignore_globs: &[String]) -> Result<Vec<PathBuf>, Error> {
    let metadata = std::fs::metadata(root).map_err(|source| Error::UnreadableDirectory {
        path: root.to_path_buf(),
        source,
    })?;
    if !metadata.is_dir() {
        return Err(Error::UnreadableDirectory {
            path: root.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        });
    }

    let ignore_patterns: Vec<Pattern> = ignore_globs
        .iter()
        .filter_map(|glob| match Pattern::new(glob) {
            Ok(p) => Some(p),
            Err(e) => {
                error!("Invalid glob pattern '{}': {}", glob, e);
                None
            }
        })
        .collect();

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !ignore_patterns
                .iter()
                .any(|pattern| pattern.matches_path(entry.path()))
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                match err.into_io_error() {
                    Some(io_err) if io_err.kind() == io::ErrorKind::PermissionDenied => {
                        error!("Access denied reading {}: {}", path.display(), io_err);
                        continue;
                    }
                    Some(io_err) => {
                        return Err(Error::UnreadableDirectory {
                            path,
                            source: io_err,
                        })
                    }
                    None => {
                        return Err(Error::UnreadableDirectory {
                            path,
                            source: io::Error::new(io::ErrorKind::Other, "filesystem loop"),
                        })
                    }
                }
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            debug!("Skipping empty file {}", entry.path().display());
            continue;
        }
        files.push(entry.into_path());
    }

    Ok(files)
}
