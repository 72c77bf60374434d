use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::trace;

use super::{atomic, StateStore};
use crate::error::Error;

/// One file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, Error> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, Error> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid || key.starts_with('.') {
            return Err(Error::Store(format!("invalid key '{}'", key)));
        }
        Ok(self.dir.join(key))
    }
}

impl StateStore for FileStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.path_for(key)?) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StateCorruption {
                record: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        trace!("store set {} = {}", key, value);
        atomic::write_atomic(&self.path_for(key)?, value.as_bytes())?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), Error> {
        atomic::remove_if_exists(&self.path_for(key)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_clear() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(tmp.path().join("state")).unwrap();
        assert_eq!(store.get("compare.progress").unwrap(), None);

        store.set("compare.progress", "12").unwrap();
        assert_eq!(store.get("compare.progress").unwrap().as_deref(), Some("12"));

        store.clear("compare.progress").unwrap();
        store.clear("compare.progress").unwrap();
        assert_eq!(store.get("compare.progress").unwrap(), None);
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(tmp.path()).unwrap();
        assert!(store.set("../escape", "1").is_err());
        assert!(store.set("", "1").is_err());
    }
}
