//! Callbacks and cancellation
//!
//! These traits allow the declarative crate to be used without
//! depending on specific progress bars or prompt libraries.

use crate::drift::DriftReport;
use crate::planner::{Plan, PlanStep};
use crate::types::{ExecuteSummary, StepOutcome};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for execution operations
///
/// Called from the coordinating thread only.
pub trait ProgressCallback: Send {
    /// Called with the computed plan before confirmation
    fn on_plan(&mut self, _plan: &Plan, _drift: &DriftReport) {}

    /// Called once before the first step is dispatched
    fn on_apply_start(&mut self, steps: usize);

    /// Called when a step is handed to a worker
    fn on_step_start(&mut self, step: &PlanStep);

    /// Called when a step finishes, fails, is blocked or cancelled
    fn on_step_complete(&mut self, outcome: &StepOutcome);

    /// Called after the last step
    fn on_apply_complete(&mut self, summary: &ExecuteSummary);
}

/// Confirmation callback for user interaction
pub trait ConfirmCallback: Send {
    /// Ask the user to confirm an action
    ///
    /// # Returns
    /// `true` if the user confirmed, `false` otherwise
    fn confirm(&mut self, prompt: &str) -> io::Result<bool>;
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_apply_start(&mut self, _steps: usize) {}
    fn on_step_start(&mut self, _step: &PlanStep) {}
    fn on_step_complete(&mut self, _outcome: &StepOutcome) {}
    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {}
}

/// Auto-confirm callback (always returns true)
pub struct AutoConfirm;

impl ConfirmCallback for AutoConfirm {
    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(true)
    }
}

/// Auto-decline callback (always returns false)
pub struct AutoDecline;

impl ConfirmCallback for AutoDecline {
    fn confirm(&mut self, _prompt: &str) -> io::Result<bool> {
        Ok(false)
    }
}

/// Shared flag that stops an apply from dispatching further steps.
///
/// Steps already running finish and their state is persisted; the rest
/// are reported as cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_auto_callbacks() {
        assert!(AutoConfirm.confirm("Apply?").unwrap());
        assert!(!AutoDecline.confirm("Apply?").unwrap());
    }
}
