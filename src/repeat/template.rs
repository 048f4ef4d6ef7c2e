use log::debug;

use crate::BatchError;

use super::{
    RepeatCallback, RepeatListener, RepeatOperations, RepeatStatus,
    context::RepeatContext,
    exception::{DefaultExceptionHandler, ExceptionHandler},
    policy::{CompletionPolicy, DefaultResultCompletionPolicy},
};

/// Runs a repeat callback on the calling thread until the completion policy
/// says the iteration is complete.
///
/// Errors raised by the callback go through the exception handler. The first
/// error it rethrows ends the iteration and is returned once listeners and
/// destruction callbacks have been closed.
///
/// # Examples
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use resumable_batch::repeat::{RepeatOperations, RepeatStatus, RepeatTemplate};
/// use resumable_batch::repeat::policy::SimpleCompletionPolicy;
///
/// let template = RepeatTemplate::new().with_completion_policy(SimpleCompletionPolicy::new(3));
/// let calls = AtomicUsize::new(0);
///
/// let status = template
///     .iterate(&|_context| {
///         calls.fetch_add(1, Ordering::SeqCst);
///         Ok(RepeatStatus::Continuable)
///     })
///     .unwrap();
///
/// assert_eq!(calls.load(Ordering::SeqCst), 3);
/// assert_eq!(status, RepeatStatus::Continuable);
/// ```
pub struct RepeatTemplate<'a> {
    pub(super) completion_policy: Box<dyn CompletionPolicy + 'a>,
    exception_handler: Box<dyn ExceptionHandler + 'a>,
    listeners: Vec<&'a dyn RepeatListener>,
}

impl<'a> RepeatTemplate<'a> {
    pub fn new() -> Self {
        Self {
            completion_policy: Box::new(DefaultResultCompletionPolicy),
            exception_handler: Box::new(DefaultExceptionHandler),
            listeners: Vec::new(),
        }
    }

    pub fn with_completion_policy(mut self, policy: impl CompletionPolicy + 'a) -> Self {
        self.completion_policy = Box::new(policy);
        self
    }

    pub fn with_exception_handler(mut self, handler: impl ExceptionHandler + 'a) -> Self {
        self.exception_handler = Box::new(handler);
        self
    }

    pub fn register_listener(mut self, listener: &'a dyn RepeatListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Opens listeners. Returns whether the iteration should run at all.
    pub(super) fn open(&self, context: &RepeatContext<'_>) -> bool {
        self.completion_policy.start(context);
        let mut running = !context.is_marked_complete();
        for listener in &self.listeners {
            listener.open(context);
            running = running && !context.is_marked_complete();
        }
        running
    }

    pub(super) fn before(&self, context: &RepeatContext<'_>) -> bool {
        let mut running = true;
        for listener in &self.listeners {
            listener.before(context);
            running = running && !context.is_marked_complete();
        }
        running
    }

    /// Accounts for a callback about to start.
    pub(super) fn update(&self, context: &RepeatContext<'_>) {
        context.increment_started_count();
        self.completion_policy.update(context);
    }

    pub(super) fn after(&self, context: &RepeatContext<'_>, status: RepeatStatus) {
        self.completion_policy.record(context, status);
        for listener in &self.listeners {
            listener.after(context, status);
        }
    }

    /// Routes an error to listeners and the exception handler. Errors the
    /// handler rethrows are kept to end the iteration.
    pub(super) fn handle(&self, context: &RepeatContext<'_>, error: BatchError, deferred: &mut Vec<BatchError>) {
        for listener in &self.listeners {
            listener.on_error(context, &error);
        }
        if let Err(error) = self.exception_handler.handle_exception(context, error) {
            debug!("Handled fatal exception in repeat callback: {}", error);
            deferred.push(error);
        }
    }

    pub(super) fn is_complete(&self, context: &RepeatContext<'_>, status: RepeatStatus, deferred: &[BatchError]) -> bool {
        self.completion_policy.is_complete_with(context, status)
            || context.is_marked_complete()
            || !deferred.is_empty()
    }

    /// Closes listeners and the context, then returns the outcome of the
    /// iteration. An error of the iteration wins over a close error.
    pub(super) fn close(
        &self,
        context: &RepeatContext<'_>,
        outcome: Result<RepeatStatus, BatchError>,
    ) -> Result<RepeatStatus, BatchError> {
        for listener in &self.listeners {
            listener.close(context);
        }
        let closed = context.close();
        let status = outcome?;
        closed?;
        Ok(status)
    }

    fn execute_loop(&self, context: &RepeatContext<'_>, callback: &RepeatCallback<'_>) -> Result<RepeatStatus, BatchError> {
        let mut result = RepeatStatus::Continuable;
        let mut deferred = Vec::new();
        let mut running = self.open(context);

        while running {
            running = self.before(context);
            if !running {
                break;
            }

            self.update(context);
            match callback(context) {
                Ok(status) => {
                    result = status;
                    self.after(context, status);
                }
                Err(error) => self.handle(context, error, &mut deferred),
            }

            if self.is_complete(context, result, &deferred) {
                running = false;
            }
        }

        match deferred.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(result),
        }
    }
}

impl Default for RepeatTemplate<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatOperations for RepeatTemplate<'_> {
    fn iterate_within(
        &self,
        parent: Option<&RepeatContext<'_>>,
        callback: &RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let context = RepeatContext::new(parent);
        let outcome = self.execute_loop(&context, callback);
        self.close(&context, outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::repeat::{exception::SimpleLimitExceptionHandler, policy::SimpleCompletionPolicy};

    use super::*;

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RepeatListener for RecordingListener {
        fn open(&self, _context: &RepeatContext<'_>) {
            self.events.lock().push("open".to_string());
        }
        fn before(&self, _context: &RepeatContext<'_>) {
            self.events.lock().push("before".to_string());
        }
        fn after(&self, _context: &RepeatContext<'_>, status: RepeatStatus) {
            self.events.lock().push(format!("after:{:?}", status));
        }
        fn on_error(&self, _context: &RepeatContext<'_>, _error: &BatchError) {
            self.events.lock().push("error".to_string());
        }
        fn close(&self, _context: &RepeatContext<'_>) {
            self.events.lock().push("close".to_string());
        }
    }

    #[test]
    fn stops_when_callback_reports_finished() {
        let template = RepeatTemplate::new();
        let calls = AtomicUsize::new(0);

        let status = template
            .iterate(&|_| {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(RepeatStatus::continue_if(call < 4))
            })
            .unwrap();

        assert_eq!(status, RepeatStatus::Finished);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn error_ends_iteration_and_runs_destruction_callbacks() {
        let template = RepeatTemplate::new();
        let destroyed = std::sync::Arc::new(AtomicUsize::new(0));

        let result = template.iterate(&|context| {
            let destroyed = std::sync::Arc::clone(&destroyed);
            context.register_destruction_callback("count", move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            Err(BatchError::ItemReader("broken".to_string()))
        });

        assert_eq!(result, Err(BatchError::ItemReader("broken".to_string())));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn swallowed_errors_do_not_stop_iteration() {
        let template = RepeatTemplate::new()
            .with_completion_policy(SimpleCompletionPolicy::new(3))
            .with_exception_handler(SimpleLimitExceptionHandler::new(2));
        let calls = AtomicUsize::new(0);

        let status = template
            .iterate(&|_| {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BatchError::ItemProcessor("transient".to_string()))
                } else {
                    Ok(RepeatStatus::Continuable)
                }
            })
            .unwrap();

        assert_eq!(status, RepeatStatus::Continuable);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn nested_iteration_stops_when_parent_is_marked_complete() {
        let outer = RepeatTemplate::new();
        let inner = RepeatTemplate::new();
        let inner_calls = AtomicUsize::new(0);

        outer
            .iterate(&|outer_context| {
                inner.iterate_within(Some(outer_context), &|_| {
                    if inner_calls.fetch_add(1, Ordering::SeqCst) == 1 {
                        outer_context.set_complete_only();
                    }
                    Ok(RepeatStatus::Continuable)
                })
            })
            .unwrap();

        assert_eq!(inner_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn listeners_see_every_phase_in_order() {
        let listener = RecordingListener::default();
        let template = RepeatTemplate::new()
            .with_completion_policy(SimpleCompletionPolicy::new(2))
            .with_exception_handler(SimpleLimitExceptionHandler::new(1))
            .register_listener(&listener);
        let calls = AtomicUsize::new(0);

        template
            .iterate(&|_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(BatchError::ItemReader("once".to_string()))
                } else {
                    Ok(RepeatStatus::Continuable)
                }
            })
            .unwrap();

        assert_eq!(
            *listener.events.lock(),
            vec!["open", "before", "error", "before", "after:Continuable", "close"]
        );
    }
}
