use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use serde_json::Value;

use crate::BatchError;

type DestructionCallback = Box<dyn FnOnce() -> Result<(), BatchError> + Send>;

/// State of one iteration of the repeat engine.
///
/// A context lives as long as one call to `iterate` and may be shared by the
/// worker threads of a concurrent iteration, so all of its state sits behind
/// atomics or a lock. Nested iterations link their context to the enclosing
/// one.
pub struct RepeatContext<'p> {
    parent: Option<&'p RepeatContext<'p>>,
    started_count: AtomicUsize,
    complete_only: AtomicBool,
    terminate_only: AtomicBool,
    attributes: Mutex<HashMap<String, Value>>,
    destruction_callbacks: Mutex<Vec<(String, DestructionCallback)>>,
    start: Instant,
}

impl<'p> RepeatContext<'p> {
    pub fn new(parent: Option<&'p RepeatContext<'p>>) -> Self {
        Self {
            parent,
            started_count: AtomicUsize::new(0),
            complete_only: AtomicBool::new(false),
            terminate_only: AtomicBool::new(false),
            attributes: Mutex::new(HashMap::new()),
            destruction_callbacks: Mutex::new(Vec::new()),
            start: Instant::now(),
        }
    }

    pub fn parent(&self) -> Option<&'p RepeatContext<'p>> {
        self.parent
    }

    /// Number of callbacks started in this iteration.
    pub fn started_count(&self) -> usize {
        self.started_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_started_count(&self) {
        self.started_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Ends the iteration once the current callback returns.
    pub fn set_complete_only(&self) {
        self.complete_only.store(true, Ordering::SeqCst);
    }

    pub fn is_complete_only(&self) -> bool {
        self.complete_only.load(Ordering::SeqCst)
    }

    /// Ends the iteration and tells enclosing iterations to stop as well.
    pub fn set_terminate_only(&self) {
        self.terminate_only.store(true, Ordering::SeqCst);
        self.set_complete_only();
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only.load(Ordering::SeqCst)
    }

    /// True when this context or any enclosing one was marked complete.
    pub fn is_marked_complete(&self) -> bool {
        self.is_complete_only() || self.parent.is_some_and(|parent| parent.is_marked_complete())
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn set_attribute(&self, key: &str, value: Value) {
        self.attributes.lock().insert(key.to_string(), value);
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().get(key).cloned()
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.lock().remove(key)
    }

    /// Adds `delta` to an integer attribute, starting from zero, and returns
    /// the new value.
    pub fn increment_counter(&self, key: &str, delta: u64) -> u64 {
        let mut attributes = self.attributes.lock();
        let value = attributes.get(key).and_then(Value::as_u64).unwrap_or(0) + delta;
        attributes.insert(key.to_string(), Value::from(value));
        value
    }

    pub fn reset_counter(&self, key: &str) {
        self.attributes.lock().insert(key.to_string(), Value::from(0u64));
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.attributes
            .lock()
            .get(key)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Registers a callback run when the iteration ends, even on failure.
    pub fn register_destruction_callback<F>(&self, name: &str, callback: F)
    where
        F: FnOnce() -> Result<(), BatchError> + Send + 'static,
    {
        self.destruction_callbacks
            .lock()
            .push((name.to_string(), Box::new(callback)));
    }

    /// Runs every destruction callback. All of them run even if one fails;
    /// the first failure is returned.
    pub fn close(&self) -> Result<(), BatchError> {
        let callbacks = std::mem::take(&mut *self.destruction_callbacks.lock());
        let mut first_error = None;
        for (name, callback) in callbacks {
            if let Err(error) = callback() {
                log::error!("Destruction callback '{}' failed: {}", name, error);
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for RepeatContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepeatContext")
            .field("started_count", &self.started_count())
            .field("complete_only", &self.is_complete_only())
            .field("terminate_only", &self.is_terminate_only())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, atomic::AtomicUsize};

    use super::*;

    #[test]
    fn completion_of_parent_is_seen_by_child() {
        let parent = RepeatContext::new(None);
        let child = RepeatContext::new(Some(&parent));
        assert!(!child.is_marked_complete());

        parent.set_terminate_only();

        assert!(parent.is_complete_only());
        assert!(!child.is_complete_only());
        assert!(child.is_marked_complete());
    }

    #[test]
    fn all_destruction_callbacks_run_and_first_error_wins() {
        let context = RepeatContext::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        for name in ["first", "second", "third"] {
            let calls = Arc::clone(&calls);
            context.register_destruction_callback(name, move || {
                calls.fetch_add(1, Ordering::SeqCst);
                if name == "third" {
                    Ok(())
                } else {
                    Err(BatchError::Step(name.to_string()))
                }
            });
        }

        assert_eq!(context.close(), Err(BatchError::Step("first".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(context.close(), Ok(()));
    }

    #[test]
    fn counters_live_in_attributes() {
        let context = RepeatContext::new(None);
        assert_eq!(context.increment_counter("errors", 1), 1);
        assert_eq!(context.increment_counter("errors", 2), 3);
        assert_eq!(context.counter("errors"), 3);
        context.reset_counter("errors");
        assert_eq!(context.counter("errors"), 0);
        assert!(context.has_attribute("errors"));
    }
}
