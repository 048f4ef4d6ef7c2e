use std::thread;

use crossbeam::channel;
use log::debug;

use crate::BatchError;

use super::{
    RepeatCallback, RepeatListener, RepeatOperations, RepeatStatus,
    context::RepeatContext,
    exception::ExceptionHandler,
    policy::CompletionPolicy,
    template::RepeatTemplate,
};

/// Repeats a callback on worker threads.
///
/// Callbacks are dispatched to scoped threads, at most `throttle_limit` of
/// them in flight at once, and their results come back through a channel.
/// When the iteration completes, whether by policy, by a `Finished` result or
/// by an error, every callback already dispatched is waited for before
/// `iterate` returns: in-flight work is never dropped.
///
/// The callback and the context are shared between threads, so whatever the
/// callback mutates must be synchronized.
pub struct TaskExecutorRepeatTemplate<'a> {
    template: RepeatTemplate<'a>,
    throttle_limit: usize,
}

impl<'a> TaskExecutorRepeatTemplate<'a> {
    pub const DEFAULT_THROTTLE_LIMIT: usize = 4;

    pub fn new() -> Self {
        Self {
            template: RepeatTemplate::new(),
            throttle_limit: Self::DEFAULT_THROTTLE_LIMIT,
        }
    }

    /// Maximum number of callbacks running at once. Zero is treated as one.
    pub fn with_throttle_limit(mut self, throttle_limit: usize) -> Self {
        self.throttle_limit = throttle_limit.max(1);
        self
    }

    pub fn with_completion_policy(mut self, policy: impl CompletionPolicy + 'a) -> Self {
        self.template = self.template.with_completion_policy(policy);
        self
    }

    pub fn with_exception_handler(mut self, handler: impl ExceptionHandler + 'a) -> Self {
        self.template = self.template.with_exception_handler(handler);
        self
    }

    pub fn register_listener(mut self, listener: &'a dyn RepeatListener) -> Self {
        self.template = self.template.register_listener(listener);
        self
    }

    pub fn throttle_limit(&self) -> usize {
        self.throttle_limit
    }

    fn execute_concurrently(
        &self,
        context: &RepeatContext<'_>,
        callback: &RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let template = &self.template;
        let (sender, receiver) = channel::unbounded::<Result<RepeatStatus, BatchError>>();

        thread::scope(|scope| {
            let mut in_flight = 0usize;
            let mut result = RepeatStatus::Continuable;
            let mut deferred = Vec::new();
            let mut running = template.open(context);

            while running {
                running = template.before(context);
                if !running {
                    break;
                }

                // Keep dispatching until a result is ready, the throttle is
                // full or the policy says enough has been started.
                while in_flight < self.throttle_limit {
                    template.update(context);
                    let sender = sender.clone();
                    scope.spawn(move || {
                        let _ = sender.send(callback(context));
                    });
                    in_flight += 1;

                    if !receiver.is_empty()
                        || template.completion_policy.is_complete(context)
                        || context.is_marked_complete()
                    {
                        break;
                    }
                }

                let Ok(outcome) = receiver.recv() else {
                    break;
                };
                in_flight -= 1;
                match outcome {
                    Ok(status) => {
                        result = status;
                        template.after(context, status);
                    }
                    Err(error) => template.handle(context, error, &mut deferred),
                }

                if template.is_complete(context, result, &deferred) {
                    running = false;
                }
            }

            if in_flight > 0 {
                debug!("Waiting for {} callbacks still in flight", in_flight);
            }
            while in_flight > 0 {
                let Ok(outcome) = receiver.recv() else {
                    break;
                };
                in_flight -= 1;
                match outcome {
                    Ok(status) => {
                        result = result.and(status.is_continuable());
                        template.after(context, status);
                    }
                    Err(error) => template.handle(context, error, &mut deferred),
                }
            }

            match deferred.into_iter().next() {
                Some(error) => Err(error),
                None => Ok(result),
            }
        })
    }
}

impl Default for TaskExecutorRepeatTemplate<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatOperations for TaskExecutorRepeatTemplate<'_> {
    fn iterate_within(
        &self,
        parent: Option<&RepeatContext<'_>>,
        callback: &RepeatCallback<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let context = RepeatContext::new(parent);
        let outcome = self.execute_concurrently(&context, callback);
        self.template.close(&context, outcome)
    }
}
