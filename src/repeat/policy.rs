use std::time::Duration;

use super::{RepeatStatus, context::RepeatContext};

/// Decides when an iteration of the repeat engine is complete.
///
/// Policies are stateless; whatever they need to remember between calls is
/// kept in the [`RepeatContext`] of the iteration.
pub trait CompletionPolicy: Send + Sync {
    /// Called once when an iteration starts.
    fn start(&self, _context: &RepeatContext<'_>) {}

    /// Called each time a callback is about to be started.
    fn update(&self, _context: &RepeatContext<'_>) {}

    /// Called once with the status of each completed callback.
    fn record(&self, _context: &RepeatContext<'_>, _status: RepeatStatus) {}

    /// Whether the iteration is complete, regardless of the last result.
    fn is_complete(&self, context: &RepeatContext<'_>) -> bool;

    /// Whether the iteration is complete given the last callback status.
    fn is_complete_with(&self, context: &RepeatContext<'_>, status: RepeatStatus) -> bool {
        !status.is_continuable() || self.is_complete(context)
    }
}

/// Completes as soon as a callback reports [`RepeatStatus::Finished`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResultCompletionPolicy;

impl CompletionPolicy for DefaultResultCompletionPolicy {
    fn is_complete(&self, _context: &RepeatContext<'_>) -> bool {
        false
    }
}

/// Completes after a fixed number of callbacks, or earlier on
/// [`RepeatStatus::Finished`]. This is what bounds a chunk to its commit
/// interval.
#[derive(Debug, Clone, Copy)]
pub struct SimpleCompletionPolicy {
    chunk_size: usize,
}

impl SimpleCompletionPolicy {
    pub const DEFAULT_CHUNK_SIZE: usize = 5;

    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

impl Default for SimpleCompletionPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CHUNK_SIZE)
    }
}

impl CompletionPolicy for SimpleCompletionPolicy {
    fn is_complete(&self, context: &RepeatContext<'_>) -> bool {
        context.started_count() >= self.chunk_size
    }
}

/// Completes after a number of consecutive callbacks reported
/// [`RepeatStatus::Finished`]. A continuable result resets the count.
#[derive(Debug, Clone, Copy)]
pub struct CountingCompletionPolicy {
    max_count: u64,
}

impl CountingCompletionPolicy {
    const COUNT_KEY: &'static str = "CountingCompletionPolicy.count";

    pub fn new(max_count: u64) -> Self {
        Self { max_count }
    }
}

impl CompletionPolicy for CountingCompletionPolicy {
    fn start(&self, context: &RepeatContext<'_>) {
        context.reset_counter(Self::COUNT_KEY);
    }

    fn record(&self, context: &RepeatContext<'_>, status: RepeatStatus) {
        match status {
            RepeatStatus::Finished => {
                context.increment_counter(Self::COUNT_KEY, 1);
            }
            RepeatStatus::Continuable => context.reset_counter(Self::COUNT_KEY),
        }
    }

    fn is_complete(&self, context: &RepeatContext<'_>) -> bool {
        context.counter(Self::COUNT_KEY) >= self.max_count
    }

    fn is_complete_with(&self, context: &RepeatContext<'_>, _status: RepeatStatus) -> bool {
        self.is_complete(context)
    }
}

/// Completes once the iteration has been running for longer than a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutTerminationPolicy {
    timeout: Duration,
}

impl TimeoutTerminationPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl CompletionPolicy for TimeoutTerminationPolicy {
    fn is_complete(&self, context: &RepeatContext<'_>) -> bool {
        context.elapsed() >= self.timeout
    }
}

/// Completes as soon as any of its delegates does.
#[derive(Default)]
pub struct CompositeCompletionPolicy {
    policies: Vec<Box<dyn CompletionPolicy>>,
}

impl CompositeCompletionPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, policy: impl CompletionPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl CompletionPolicy for CompositeCompletionPolicy {
    fn start(&self, context: &RepeatContext<'_>) {
        self.policies.iter().for_each(|policy| policy.start(context));
    }

    fn update(&self, context: &RepeatContext<'_>) {
        self.policies.iter().for_each(|policy| policy.update(context));
    }

    fn record(&self, context: &RepeatContext<'_>, status: RepeatStatus) {
        self.policies
            .iter()
            .for_each(|policy| policy.record(context, status));
    }

    fn is_complete(&self, context: &RepeatContext<'_>) -> bool {
        self.policies.iter().any(|policy| policy.is_complete(context))
    }

    fn is_complete_with(&self, context: &RepeatContext<'_>, status: RepeatStatus) -> bool {
        self.policies
            .iter()
            .any(|policy| policy.is_complete_with(context, status))
    }
}
