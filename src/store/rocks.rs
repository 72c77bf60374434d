use rocksdb::{Options, WriteOptions, DB};
use std::path::Path;
use tracing::debug;

use super::StateStore;
use crate::error::Error;

/// Embedded key-value backend for pipeline state records.
pub struct RocksStateStore {
    db: DB,
}

impl RocksStateStore {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        let db = DB::open(&db_options, path).map_err(|e| Error::Store(e.to_string()))?;
        debug!("Using '{}' for pipeline state", path.display());
        Ok(Self { db })
    }

    fn synced() -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(true);
        opts
    }
}

impl StateStore for RocksStateStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        match self.db.get(key.as_bytes()) {
            Ok(Some(value)) => String::from_utf8(value)
                .map(Some)
                .map_err(|e| Error::StateCorruption {
                    record: key.to_string(),
                    reason: e.to_string(),
                }),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Store(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.db
            .put_opt(key.as_bytes(), value.as_bytes(), &Self::synced())
            .map_err(|e| Error::Store(e.to_string()))
    }

    fn clear(&self, key: &str) -> Result<(), Error> {
        self.db
            .delete_opt(key.as_bytes(), &Self::synced())
            .map_err(|e| Error::Store(e.to_string()))
    }
}
