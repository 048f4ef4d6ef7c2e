//! # Repeat engine
//!
//! Calls a unit of work over and over until a [`CompletionPolicy`] says the
//! iteration is finished. This is the loop beneath every step (one call per
//! chunk transaction) and beneath every chunk (one call per item read).
//!
//! Two implementations of [`RepeatOperations`] are provided:
//! - [`RepeatTemplate`] runs the callback on the calling thread.
//! - [`TaskExecutorRepeatTemplate`] dispatches callbacks to scoped worker
//!   threads, never more than its throttle limit at once, and waits for all
//!   dispatched work before returning.
//!
//! [`CompletionPolicy`]: policy::CompletionPolicy

use crate::BatchError;

pub mod concurrent;
pub mod context;
pub mod exception;
pub mod policy;
pub mod template;

pub use concurrent::TaskExecutorRepeatTemplate;
pub use context::RepeatContext;
pub use template::RepeatTemplate;

/// Outcome of one callback, or of a whole iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatStatus {
    /// There may be more work to do.
    Continuable,
    /// The work is done.
    Finished,
}

impl RepeatStatus {
    pub fn continue_if(continuable: bool) -> Self {
        if continuable {
            RepeatStatus::Continuable
        } else {
            RepeatStatus::Finished
        }
    }

    pub fn is_continuable(&self) -> bool {
        *self == RepeatStatus::Continuable
    }

    /// Continuable only if both this status and `continuable` are.
    pub fn and(self, continuable: bool) -> Self {
        Self::continue_if(self.is_continuable() && continuable)
    }
}

/// A unit of work driven by [`RepeatOperations`].
pub type RepeatCallback<'c> = dyn Fn(&RepeatContext<'_>) -> Result<RepeatStatus, BatchError> + Sync + 'c;

pub trait RepeatOperations: Sync {
    /// Runs the callback until the iteration is complete.
    fn iterate(&self, callback: &RepeatCallback<'_>) -> Result<RepeatStatus, BatchError> {
        self.iterate_within(None, callback)
    }

    /// Same as [`RepeatOperations::iterate`], nested under an enclosing
    /// iteration. Marking the parent complete also completes this one.
    fn iterate_within(
        &self,
        parent: Option<&RepeatContext<'_>>,
        callback: &RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError>;
}

/// Callbacks around an iteration and each of its calls.
pub trait RepeatListener: Sync {
    fn open(&self, _context: &RepeatContext<'_>) {}

    fn before(&self, _context: &RepeatContext<'_>) {}

    fn after(&self, _context: &RepeatContext<'_>, _status: RepeatStatus) {}

    fn on_error(&self, _context: &RepeatContext<'_>, _error: &BatchError) {}

    fn close(&self, _context: &RepeatContext<'_>) {}
}
