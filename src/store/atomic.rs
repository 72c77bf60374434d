use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Write to a temp sibling, fsync, then rename into place. Readers only ever
/// see the old contents or the complete new contents.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let mut f = File::create(tmp)?;
    f.write_all(bytes)?;
    f.flush()?;
    f.sync_all()?;
    drop(f);

    promote(tmp, path)
}

/// Rename `from` over `to`.
pub fn promote(from: &Path, to: &Path) -> io::Result<()> {
    #[cfg(windows)]
    {
        // Windows refuses to rename over an existing file
        if to.exists() {
            fs::remove_file(to)?;
        }
    }
    fs::rename(from, to)
}

/// Append one line and fsync before returning.
pub fn append_line_synced(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut f = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}", line)?;
    f.flush()?;
    f.sync_all()
}

/// True when `path` exists and holds at least one byte.
pub fn is_non_empty(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Remove a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_and_cleans_tmp() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/out.txt");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "two");
        assert!(!tmp.path().join("nested/out.txt.tmp").exists());
    }

    #[test]
    fn test_remove_if_exists_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("gone.txt");
        fs::write(&path, "x").unwrap();
        assert!(remove_if_exists(&path).unwrap());
        assert!(!remove_if_exists(&path).unwrap());
    }
}
