use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use serde_json::Value;

use crate::BatchError;

/// History of one retryable operation: how many attempts failed, with which
/// error, and since when it has been tried.
///
/// For stateful retry the context outlives the call that created it: it is
/// stored in a [`RetryContextCache`](super::cache::RetryContextCache) under
/// the business key and picked up again by the next call with that key.
#[derive(Debug, Clone)]
pub struct RetryContext {
    retry_count: usize,
    last_error: Option<BatchError>,
    parent: Option<Box<RetryContext>>,
    exhausted_only: bool,
    attributes: HashMap<String, Value>,
    start: Instant,
}

impl RetryContext {
    pub fn new(parent: Option<&RetryContext>) -> Self {
        Self {
            retry_count: 0,
            last_error: None,
            parent: parent.map(|parent| Box::new(parent.clone())),
            exhausted_only: false,
            attributes: HashMap::new(),
            start: Instant::now(),
        }
    }

    /// Number of failed attempts so far.
    pub fn retry_count(&self) -> usize {
        self.retry_count
    }

    pub fn last_error(&self) -> Option<&BatchError> {
        self.last_error.as_ref()
    }

    /// Snapshot of the enclosing retry context when this one was opened.
    pub fn parent(&self) -> Option<&RetryContext> {
        self.parent.as_deref()
    }

    pub fn register_error(&mut self, error: &BatchError) {
        self.retry_count += 1;
        self.last_error = Some(error.clone());
    }

    /// Prevents any further attempt.
    pub fn set_exhausted_only(&mut self) {
        self.exhausted_only = true;
    }

    pub fn is_exhausted_only(&self) -> bool {
        self.exhausted_only
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn set_attribute(&mut self, key: &str, value: Value) {
        self.attributes.insert(key.to_string(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }
}
