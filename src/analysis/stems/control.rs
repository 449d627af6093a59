//! Deadline and cancellation for a running separation

use crate::error::{Result, TunematchError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared cancellation flag; cloning shares the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Polled by separators between chunks and between STFT frames
#[derive(Debug, Clone)]
pub struct SeparationControl {
    budget: Duration,
    deadline: Option<Instant>,
    cancel: CancelFlag,
}

impl SeparationControl {
    /// Start the clock now with the given budget
    pub fn start(budget: Duration, cancel: CancelFlag) -> Self {
        Self {
            budget,
            deadline: Instant::now().checked_add(budget),
            cancel,
        }
    }

    /// No deadline, never cancelled unless the returned control's flag is set
    pub fn unbounded() -> Self {
        Self {
            budget: Duration::MAX,
            deadline: None,
            cancel: CancelFlag::new(),
        }
    }

    /// Fail with `Cancelled` or `SeparationTimeout` if work must stop
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TunematchError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(TunematchError::SeparationTimeout {
                    budget: self.budget,
                });
            }
        }
        Ok(())
    }
}
