//! Cooperative cancellation shared between a caller and a running request.

use crate::error::{ForecastError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Clonable flag; every clone observes the same cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stage boundary check.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            Err(ForecastError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}
