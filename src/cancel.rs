use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{RagError, Result};

/// Cooperative cancellation signal shared between a caller and a running operation.
///
/// Cloning yields another handle to the same flag. Long-running operations call
/// [`CancellationFlag::check`] before every call that may block on a backend.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancellationFlag {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Reset the flag so the same handle can be reused for the next request.
    #[inline]
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RagError::Cancelled)
        } else {
            Ok(())
        }
    }
}
