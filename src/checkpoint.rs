use tracing::debug;

use crate::error::Error;
use crate::store::StateStore;

/// Count of fully processed units for one stage, held in a `StateStore`.
///
/// Callers make each unit's outcome durable first and only then `advance`,
/// so the stored count never runs ahead of recorded work.
pub struct Checkpoint<'a> {
    store: &'a dyn StateStore,
    key: String,
}

impl<'a> Checkpoint<'a> {
    pub fn new(store: &'a dyn StateStore, stage_key: &str) -> Self {
        Self {
            store,
            key: format!("{}.progress", stage_key),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Units completed by an earlier, interrupted invocation. 0 when none.
    pub fn load(&self) -> Result<usize, Error> {
        match self.store.get(&self.key)? {
            None => Ok(0),
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|_| Error::StateCorruption {
                    record: self.key.clone(),
                    reason: format!("checkpoint is not a count: '{}'", raw.trim()),
                }),
        }
    }

    pub fn is_active(&self) -> Result<bool, Error> {
        Ok(self.store.get(&self.key)?.is_some())
    }

    /// Record that unit `unit_index` (0-based) is done; a resume starts at
    /// `unit_index + 1`.
    pub fn advance(&self, unit_index: usize) -> Result<(), Error> {
        self.store.set(&self.key, &(unit_index + 1).to_string())
    }

    pub fn clear(&self) -> Result<(), Error> {
        debug!("Clearing checkpoint {}", self.key);
        self.store.clear(&self.key)
    }
}
