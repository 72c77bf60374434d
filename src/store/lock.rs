use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Error;

pub const LOCK_FILE: &str = ".lock";

/// Exclusive claim on a state directory for the lifetime of one run.
///
/// A lock left behind by a killed process must be removed by hand.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl StateLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(state_dir)?;
        let path = state_dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut f) => {
                writeln!(f, "{}", std::process::id())?;
                debug!("Acquired state lock {}", path.display());
                Ok(Self { path })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(Error::StateLocked { path })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to release state lock {}: {}", self.path.display(), e);
        }
    }
}
