pub mod atomic;
mod file;
mod lock;
#[cfg(feature = "rocksdb")]
mod rocks;

pub use file::FileStateStore;
pub use lock::StateLock;
#[cfg(feature = "rocksdb")]
pub use rocks::RocksStateStore;

use crate::error::Error;

/// Small named records that must survive a crash (checkpoints, stage markers).
///
/// `set` must be durable before it returns.
pub trait StateStore {
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    fn clear(&self, key: &str) -> Result<(), Error>;
}

impl<T: StateStore + ?Sized> StateStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        (**self).set(key, value)
    }

    fn clear(&self, key: &str) -> Result<(), Error> {
        (**self).clear(key)
    }
}
