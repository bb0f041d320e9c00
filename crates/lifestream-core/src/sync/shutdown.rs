//! Process-wide termination flag

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{SyncError, SyncResult};

/// Set once by the signal handler, checked by every isolation layer
#[derive(Debug, Clone, Default)]
pub struct Shutdown(Arc<AtomicBool>);

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once triggered
    pub fn check(&self) -> SyncResult<()> {
        if self.is_triggered() {
            Err(SyncError::Interrupted)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let shutdown = Shutdown::new();
        let handle = shutdown.clone();
        assert!(shutdown.check().is_ok());

        handle.trigger();
        assert!(shutdown.is_triggered());
        assert!(matches!(shutdown.check(), Err(SyncError::Interrupted)));
    }
}
