//! # Retry engine
//!
//! Runs an operation again when it fails, as long as a [`RetryPolicy`]
//! allows it, pausing between attempts according to a [`BackOffPolicy`].
//! When attempts are exhausted an optional recovery callback supplies the
//! result instead.
//!
//! Retry is either *stateless*, every attempt happening inside a single call
//! to [`RetryTemplate::execute`], or *stateful*: the failure is rethrown so
//! the caller can roll back its transaction, the [`RetryContext`] is kept in
//! a cache under a business key, and the next call with the same key picks
//! up the count where it stopped.
//!
//! [`RetryPolicy`]: policy::RetryPolicy
//! [`BackOffPolicy`]: backoff::BackOffPolicy

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::{BatchError, classify::ErrorClassifier};

pub mod backoff;
pub mod cache;
pub mod context;
pub mod policy;
pub mod template;

pub use context::RetryContext;
pub use template::RetryTemplate;

/// Callbacks around a retryable operation.
pub trait RetryListener: Sync {
    /// Called before the first attempt. Returning `false` vetoes the whole
    /// operation.
    fn open(&self, _context: &RetryContext) -> bool {
        true
    }

    fn on_error(&self, _context: &RetryContext, _error: &BatchError) {}

    /// Called once the operation is over, with the last error if it failed.
    fn close(&self, _context: &RetryContext, _error: Option<&BatchError>) {}
}

/// Identifies a stateful retryable operation across calls.
#[derive(Debug, Clone)]
pub struct RetryState {
    key: u64,
    force_refresh: bool,
    rollback_classifier: ErrorClassifier,
}

impl RetryState {
    /// A state whose every error requires a rollback.
    pub fn new(key: u64) -> Self {
        Self {
            key,
            force_refresh: false,
            rollback_classifier: ErrorClassifier::always(true),
        }
    }

    /// A state keyed by the hash of `value`.
    pub fn for_value<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Errors classified `false` are retried in place instead of being
    /// rethrown for rollback.
    pub fn with_rollback_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.rollback_classifier = classifier;
        self
    }

    /// Ignores any cached context for this key.
    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn is_force_refresh(&self) -> bool {
        self.force_refresh
    }

    pub fn rollback_for(&self, error: &BatchError) -> bool {
        self.rollback_classifier.classify(error)
    }
}
