use std::time::Duration;

use crate::{BatchError, classify::ErrorClassifier};

use super::context::RetryContext;

/// Decides whether an operation may be attempted (again).
///
/// `can_retry` is also asked before the first attempt, when the context has
/// no error yet.
pub trait RetryPolicy: Send + Sync {
    fn can_retry(&self, context: &RetryContext) -> bool;

    fn open(&self, parent: Option<&RetryContext>) -> RetryContext {
        RetryContext::new(parent)
    }

    fn register_error(&self, context: &mut RetryContext, error: &BatchError) {
        context.register_error(error);
    }

    fn close(&self, _context: &mut RetryContext) {}
}

/// Allows a fixed number of attempts for retryable errors.
///
/// Attempts are counted from one: with `max_attempts = 3` an operation runs
/// at most three times, the first try and two retries.
///
/// # Examples
///
/// ```
/// use resumable_batch::BatchError;
/// use resumable_batch::retry::{context::RetryContext, policy::{RetryPolicy, SimpleRetryPolicy}};
///
/// let policy = SimpleRetryPolicy::new(2);
/// let mut context = policy.open(None);
/// let error = BatchError::ItemWriter("timeout".to_string());
///
/// assert!(policy.can_retry(&context));
/// policy.register_error(&mut context, &error);
/// assert!(policy.can_retry(&context));
/// policy.register_error(&mut context, &error);
/// assert!(!policy.can_retry(&context));
/// ```
#[derive(Debug, Clone)]
pub struct SimpleRetryPolicy {
    max_attempts: usize,
    retryable: ErrorClassifier,
}

impl SimpleRetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

    /// Retries every error.
    pub fn new(max_attempts: usize) -> Self {
        Self::with_classifier(max_attempts, ErrorClassifier::always(true))
    }

    pub fn with_classifier(max_attempts: usize, retryable: ErrorClassifier) -> Self {
        Self {
            max_attempts,
            retryable,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl Default for SimpleRetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy for SimpleRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        match context.last_error() {
            None => true,
            Some(error) => self.retryable.classify(error) && context.retry_count() < self.max_attempts,
        }
    }
}

/// Allows the first attempt only.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverRetryPolicy;

impl RetryPolicy for NeverRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.last_error().is_none()
    }
}

/// Retries forever. Only useful with a back-off or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysRetryPolicy;

impl RetryPolicy for AlwaysRetryPolicy {
    fn can_retry(&self, _context: &RetryContext) -> bool {
        true
    }
}

/// Retries until the operation has been tried for longer than a timeout.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutRetryPolicy {
    timeout: Duration,
}

impl TimeoutRetryPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl RetryPolicy for TimeoutRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        context.elapsed() <= self.timeout
    }
}

/// Combines policies. An optimistic composite retries if any delegate
/// allows it; a pessimistic one only if all of them do.
#[derive(Default)]
pub struct CompositeRetryPolicy {
    policies: Vec<Box<dyn RetryPolicy>>,
    optimistic: bool,
}

impl CompositeRetryPolicy {
    pub fn pessimistic() -> Self {
        Self {
            policies: Vec::new(),
            optimistic: false,
        }
    }

    pub fn optimistic() -> Self {
        Self {
            policies: Vec::new(),
            optimistic: true,
        }
    }

    pub fn with(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }
}

impl RetryPolicy for CompositeRetryPolicy {
    fn can_retry(&self, context: &RetryContext) -> bool {
        if self.optimistic {
            self.policies.iter().any(|policy| policy.can_retry(context))
        } else {
            self.policies.iter().all(|policy| policy.can_retry(context))
        }
    }

    fn close(&self, context: &mut RetryContext) {
        for policy in &self.policies {
            policy.close(context);
        }
    }
}

impl<P: RetryPolicy + ?Sized> RetryPolicy for Box<P> {
    fn can_retry(&self, context: &RetryContext) -> bool {
        (**self).can_retry(context)
    }

    fn open(&self, parent: Option<&RetryContext>) -> RetryContext {
        (**self).open(parent)
    }

    fn register_error(&self, context: &mut RetryContext, error: &BatchError) {
        (**self).register_error(context, error)
    }

    fn close(&self, context: &mut RetryContext) {
        (**self).close(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_context(failures: usize) -> RetryContext {
        let mut context = RetryContext::new(None);
        for _ in 0..failures {
            context.register_error(&BatchError::ItemWriter("down".to_string()));
        }
        context
    }

    #[test]
    fn simple_policy_only_retries_classified_errors() {
        let policy = SimpleRetryPolicy::with_classifier(
            5,
            ErrorClassifier::new(false).with(|e| matches!(e, BatchError::ItemReader(_)), true),
        );
        assert!(!policy.can_retry(&failed_context(1)));
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = SimpleRetryPolicy::new(1);
        assert!(policy.can_retry(&failed_context(0)));
        assert!(!policy.can_retry(&failed_context(1)));
    }

    #[test]
    fn never_and_always() {
        assert!(NeverRetryPolicy.can_retry(&failed_context(0)));
        assert!(!NeverRetryPolicy.can_retry(&failed_context(1)));
        assert!(AlwaysRetryPolicy.can_retry(&failed_context(100)));
    }

    #[test]
    fn composite_modes() {
        let context = failed_context(1);
        let optimistic = CompositeRetryPolicy::optimistic()
            .with(NeverRetryPolicy)
            .with(AlwaysRetryPolicy);
        let pessimistic = CompositeRetryPolicy::pessimistic()
            .with(NeverRetryPolicy)
            .with(AlwaysRetryPolicy);
        assert!(optimistic.can_retry(&context));
        assert!(!pessimistic.can_retry(&context));
    }

    #[test]
    fn timeout_policy_expires() {
        let policy = TimeoutRetryPolicy::new(Duration::ZERO);
        let context = failed_context(1);
        std::thread::sleep(Duration::from_millis(2));
        assert!(!policy.can_retry(&context));
    }
}
