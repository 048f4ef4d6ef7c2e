use log::debug;

use crate::{BatchError, classify::ErrorClassifier};

/// Decides whether a failed item may be skipped.
pub trait SkipPolicy: Send + Sync {
    /// Returns `Ok(true)` when the error is skippable and the step may still
    /// skip, `Ok(false)` when the error is not skippable at all.
    ///
    /// `skip_count` is the number of items already skipped by the step. When
    /// it is `None` only the classification of the error is checked.
    ///
    /// # Errors
    /// Returns `BatchError::SkipLimitExceeded` when the error is skippable
    /// but the limit has been reached.
    fn should_skip(&self, error: &BatchError, skip_count: Option<usize>) -> Result<bool, BatchError>;
}

/// Skips classified errors until a limit is reached.
///
/// With a limit of `L`, the first `L` skippable failures are skipped and the
/// next one fails the step.
///
/// # Examples
///
/// ```
/// use resumable_batch::{BatchError, classify::ErrorClassifier};
/// use resumable_batch::core::skip::{LimitCheckingItemSkipPolicy, SkipPolicy};
///
/// let policy = LimitCheckingItemSkipPolicy::new(
///     2,
///     ErrorClassifier::new(false).with(|e| matches!(e, BatchError::ItemProcessor(_)), true),
/// );
/// let error = BatchError::ItemProcessor("bad".to_string());
///
/// assert_eq!(policy.should_skip(&error, Some(1)), Ok(true));
/// assert!(matches!(
///     policy.should_skip(&error, Some(2)),
///     Err(BatchError::SkipLimitExceeded { limit: 2, .. })
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct LimitCheckingItemSkipPolicy {
    skip_limit: usize,
    skippable: ErrorClassifier,
}

impl LimitCheckingItemSkipPolicy {
    pub fn new(skip_limit: usize, skippable: ErrorClassifier) -> Self {
        Self {
            skip_limit,
            skippable,
        }
    }

    pub fn skip_limit(&self) -> usize {
        self.skip_limit
    }
}

impl SkipPolicy for LimitCheckingItemSkipPolicy {
    fn should_skip(&self, error: &BatchError, skip_count: Option<usize>) -> Result<bool, BatchError> {
        if !self.skippable.classify(error) {
            return Ok(false);
        }
        match skip_count {
            Some(count) if count >= self.skip_limit => {
                debug!("Skip limit of {} reached by: {}", self.skip_limit, error);
                Err(BatchError::SkipLimitExceeded {
                    limit: self.skip_limit,
                    source: Box::new(error.clone()),
                })
            }
            _ => Ok(true),
        }
    }
}

/// Skips every error, without limit.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSkipItemSkipPolicy;

impl SkipPolicy for AlwaysSkipItemSkipPolicy {
    fn should_skip(&self, _error: &BatchError, _skip_count: Option<usize>) -> Result<bool, BatchError> {
        Ok(true)
    }
}

/// Never skips.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverSkipItemSkipPolicy;

impl SkipPolicy for NeverSkipItemSkipPolicy {
    fn should_skip(&self, _error: &BatchError, _skip_count: Option<usize>) -> Result<bool, BatchError> {
        Ok(false)
    }
}
