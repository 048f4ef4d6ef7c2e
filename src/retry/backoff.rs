use std::{thread, time::Duration};

use log::debug;

use super::context::RetryContext;

/// Pauses between two attempts of a retryable operation.
pub trait BackOffPolicy: Send + Sync {
    /// Delay before the next attempt, given the failures recorded so far.
    fn interval(&self, context: &RetryContext) -> Duration;

    fn back_off(&self, context: &RetryContext) {
        let interval = self.interval(context);
        if !interval.is_zero() {
            debug!("Sleeping for {:?} before retry {}", interval, context.retry_count());
            thread::sleep(interval);
        }
    }
}

/// Retries immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackOffPolicy;

impl BackOffPolicy for NoBackOffPolicy {
    fn interval(&self, _context: &RetryContext) -> Duration {
        Duration::ZERO
    }
}

/// Waits the same interval before every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackOffPolicy {
    interval: Duration,
}

impl FixedBackOffPolicy {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedBackOffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl BackOffPolicy for FixedBackOffPolicy {
    fn interval(&self, _context: &RetryContext) -> Duration {
        self.interval
    }
}

/// Multiplies the interval after each failure, up to a maximum.
///
/// ```
/// use std::time::Duration;
///
/// use resumable_batch::BatchError;
/// use resumable_batch::retry::{backoff::{BackOffPolicy, ExponentialBackOffPolicy}, context::RetryContext};
///
/// let policy = ExponentialBackOffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_millis(300));
/// let mut context = RetryContext::new(None);
/// let error = BatchError::ItemWriter("busy".to_string());
///
/// context.register_error(&error);
/// assert_eq!(policy.interval(&context), Duration::from_millis(100));
/// context.register_error(&error);
/// assert_eq!(policy.interval(&context), Duration::from_millis(200));
/// context.register_error(&error);
/// assert_eq!(policy.interval(&context), Duration::from_millis(300));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackOffPolicy {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
}

impl ExponentialBackOffPolicy {
    pub fn new(initial_interval: Duration, multiplier: f64, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            multiplier: multiplier.max(1.0),
            max_interval,
        }
    }
}

impl Default for ExponentialBackOffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), 2.0, Duration::from_secs(30))
    }
}

impl BackOffPolicy for ExponentialBackOffPolicy {
    fn interval(&self, context: &RetryContext) -> Duration {
        let exponent = context.retry_count().saturating_sub(1).min(i32::MAX as usize) as i32;
        let millis = self.initial_interval.as_millis() as f64 * self.multiplier.powi(exponent);
        let interval = Duration::from_millis(millis.min(u64::MAX as f64) as u64);
        interval.min(self.max_interval)
    }
}
impl<P: BackOffPolicy + ?Sized> BackOffPolicy for Box<P> {
    fn interval(&self, context: &RetryContext) -> Duration {
        (**self).interval(context)
    }
}
