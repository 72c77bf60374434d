use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGTERM};

/// Cooperative cancellation flag, checked by the pipeline between units.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route SIGINT and SIGTERM into this token instead of killing the process.
    pub fn register_signals(&self) -> io::Result<()> {
        signal_hook::flag::register(SIGINT, Arc::clone(&self.flag))?;
        signal_hook::flag::register(SIGTERM, Arc::clone(&self.flag))?;
        Ok(())
    }
}
