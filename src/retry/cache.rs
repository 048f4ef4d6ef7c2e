use std::collections::HashMap;

use parking_lot::Mutex;

use crate::BatchError;

use super::context::RetryContext;

/// Keeps retry contexts of stateful operations between calls.
pub trait RetryContextCache: Send + Sync {
    fn get(&self, key: u64) -> Option<RetryContext>;

    /// # Errors
    /// Returns `BatchError::RetryCacheCapacityExceeded` when the cache is full.
    fn put(&self, key: u64, context: RetryContext) -> Result<(), BatchError>;

    fn remove(&self, key: u64);

    fn contains_key(&self, key: u64) -> bool;
}

/// Bounded in-memory [`RetryContextCache`].
///
/// Reaching the capacity usually means keys are never released, typically
/// because items are not identified consistently between attempts.
#[derive(Debug)]
pub struct MapRetryContextCache {
    contexts: Mutex<HashMap<u64, RetryContext>>,
    capacity: usize,
}

impl MapRetryContextCache {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new(capacity: usize) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}

impl Default for MapRetryContextCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl RetryContextCache for MapRetryContextCache {
    fn get(&self, key: u64) -> Option<RetryContext> {
        self.contexts.lock().get(&key).cloned()
    }

    fn put(&self, key: u64, context: RetryContext) -> Result<(), BatchError> {
        let mut contexts = self.contexts.lock();
        if contexts.len() >= self.capacity && !contexts.contains_key(&key) {
            return Err(BatchError::RetryCacheCapacityExceeded(self.capacity));
        }
        contexts.insert(key, context);
        Ok(())
    }

    fn remove(&self, key: u64) {
        self.contexts.lock().remove(&key);
    }

    fn contains_key(&self, key: u64) -> bool {
        self.contexts.lock().contains_key(&key)
    }
}

impl<C: RetryContextCache + ?Sized> RetryContextCache for &C {
    fn get(&self, key: u64) -> Option<RetryContext> {
        (**self).get(key)
    }

    fn put(&self, key: u64, context: RetryContext) -> Result<(), BatchError> {
        (**self).put(key, context)
    }

    fn remove(&self, key: u64) {
        (**self).remove(key)
    }

    fn contains_key(&self, key: u64) -> bool {
        (**self).contains_key(key)
    }
}
