//! Cooperative cancellation for long-running pipeline work.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// A cloneable flag shared between the caller and a running apply.
///
/// The apply engine checks it before each step and while waiting on the
/// install subprocess. Cancelling never rolls back completed steps.
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

    /// Fail with `Error::Cancelled` when cancellation was requested.
    pub fn check(&self, step: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled {
                step: step.to_string(),
            });
        }
        Ok(())
    }
}
