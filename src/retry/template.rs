use log::debug;

use crate::BatchError;

use super::{
    RetryListener, RetryState,
    backoff::{BackOffPolicy, NoBackOffPolicy},
    cache::{MapRetryContextCache, RetryContextCache},
    context::RetryContext,
    policy::{RetryPolicy, SimpleRetryPolicy},
};

type NoRecovery<T> = fn(&RetryContext) -> Result<T, BatchError>;

/// Executes operations with retry, back-off and recovery.
///
/// # Examples
///
/// ```
/// use std::cell::Cell;
///
/// use resumable_batch::BatchError;
/// use resumable_batch::retry::{RetryTemplate, policy::SimpleRetryPolicy};
///
/// let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(3));
/// let calls = Cell::new(0);
///
/// let value = template.execute(|_| {
///     calls.set(calls.get() + 1);
///     if calls.get() < 3 {
///         Err(BatchError::ItemWriter("busy".to_string()))
///     } else {
///         Ok("written")
///     }
/// });
///
/// assert_eq!(value, Ok("written"));
/// assert_eq!(calls.get(), 3);
/// ```
pub struct RetryTemplate<'a> {
    retry_policy: Box<dyn RetryPolicy + 'a>,
    back_off_policy: Box<dyn BackOffPolicy + 'a>,
    cache: Box<dyn RetryContextCache + 'a>,
    listeners: Vec<&'a dyn RetryListener>,
}

impl<'a> RetryTemplate<'a> {
    pub fn new() -> Self {
        Self {
            retry_policy: Box::new(SimpleRetryPolicy::default()),
            back_off_policy: Box::new(NoBackOffPolicy),
            cache: Box::new(MapRetryContextCache::default()),
            listeners: Vec::new(),
        }
    }

    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'a) -> Self {
        self.retry_policy = Box::new(policy);
        self
    }

    pub fn with_back_off_policy(mut self, policy: impl BackOffPolicy + 'a) -> Self {
        self.back_off_policy = Box::new(policy);
        self
    }

    pub fn with_retry_context_cache(mut self, cache: impl RetryContextCache + 'a) -> Self {
        self.cache = Box::new(cache);
        self
    }

    pub fn register_listener(mut self, listener: &'a dyn RetryListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Retries `callback` in place. When attempts are exhausted the last
    /// error is returned.
    pub fn execute<T, F>(&self, callback: F) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
    {
        self.do_execute(callback, None::<NoRecovery<T>>, None)
    }

    /// Retries `callback` in place and falls back to `recovery` once
    /// attempts are exhausted.
    pub fn execute_with_recovery<T, F, R>(&self, callback: F, recovery: R) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        self.do_execute(callback, Some(recovery), None)
    }

    /// Stateful retry without recovery. Exhaustion yields
    /// `BatchError::RetryExhausted` wrapping the last error.
    pub fn execute_stateful<T, F>(&self, callback: F, state: &RetryState) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
    {
        self.do_execute(callback, None::<NoRecovery<T>>, Some(state))
    }

    /// Stateful retry.
    ///
    /// A failure that needs a rollback is registered against `state` and
    /// returned to the caller. The next call with the same key continues
    /// counting from the cached context, and once the policy refuses another
    /// attempt the key is dropped and `recovery` runs instead of `callback`.
    pub fn execute_stateful_with_recovery<T, F, R>(
        &self,
        callback: F,
        recovery: R,
        state: &RetryState,
    ) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        self.do_execute(callback, Some(recovery), Some(state))
    }

    fn do_execute<T, F, R>(
        &self,
        mut callback: F,
        recovery: Option<R>,
        state: Option<&RetryState>,
    ) -> Result<T, BatchError>
    where
        F: FnMut(&RetryContext) -> Result<T, BatchError>,
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        let mut context = self.open(state);

        let mut allowed = true;
        for listener in &self.listeners {
            allowed &= listener.open(&context);
        }
        if !allowed {
            let error = BatchError::RetryTerminated("Retry vetoed by listener".to_string());
            self.close(&mut context, state, Some(&error), false);
            return Err(error);
        }

        let mut last_error = None;
        while self.can_retry(&context) {
            match callback(&context) {
                Ok(value) => {
                    self.close(&mut context, state, None, true);
                    return Ok(value);
                }
                Err(error) => {
                    if let Err(cache_error) = self.register_error(&mut context, state, &error) {
                        self.close(&mut context, state, Some(&cache_error), false);
                        return Err(cache_error);
                    }
                    for listener in &self.listeners {
                        listener.on_error(&context, &error);
                    }

                    if self.can_retry(&context) {
                        self.back_off_policy.back_off(&context);
                    }

                    match state {
                        Some(state) if state.rollback_for(&error) => {
                            debug!(
                                "Rethrow in retry for key {} after {} attempts",
                                state.key(),
                                context.retry_count()
                            );
                            self.close(&mut context, Some(state), Some(&error), false);
                            return Err(error);
                        }
                        _ => last_error = Some(error),
                    }
                }
            }
        }

        debug!("Retry failed after {} attempts", context.retry_count());
        let last_error = last_error.or_else(|| context.last_error().cloned());
        self.handle_exhausted(context, recovery, state, last_error)
    }

    fn open(&self, state: Option<&RetryState>) -> RetryContext {
        match state {
            Some(state) if !state.is_force_refresh() => self
                .cache
                .get(state.key())
                .unwrap_or_else(|| self.retry_policy.open(None)),
            _ => self.retry_policy.open(None),
        }
    }

    fn can_retry(&self, context: &RetryContext) -> bool {
        !context.is_exhausted_only() && self.retry_policy.can_retry(context)
    }

    fn register_error(
        &self,
        context: &mut RetryContext,
        state: Option<&RetryState>,
        error: &BatchError,
    ) -> Result<(), BatchError> {
        self.retry_policy.register_error(context, error);
        match state {
            Some(state) => self.cache.put(state.key(), context.clone()),
            None => Ok(()),
        }
    }

    fn handle_exhausted<T, R>(
        &self,
        mut context: RetryContext,
        recovery: Option<R>,
        state: Option<&RetryState>,
        last_error: Option<BatchError>,
    ) -> Result<T, BatchError>
    where
        R: FnOnce(&RetryContext) -> Result<T, BatchError>,
    {
        if let Some(state) = state {
            self.cache.remove(state.key());
        }

        let outcome = match (recovery, &last_error) {
            (Some(recover), _) => recover(&context),
            (None, Some(error)) if state.is_some() => Err(BatchError::RetryExhausted(Box::new(error.clone()))),
            (None, Some(error)) => Err(error.clone()),
            (None, None) => Err(BatchError::RetryTerminated(
                "Retry policy refused the first attempt".to_string(),
            )),
        };

        self.close(&mut context, state, last_error.as_ref(), true);
        outcome
    }

    fn close(
        &self,
        context: &mut RetryContext,
        state: Option<&RetryState>,
        error: Option<&BatchError>,
        finished: bool,
    ) {
        match state {
            Some(state) if finished => {
                self.cache.remove(state.key());
                self.retry_policy.close(context);
            }
            Some(_) => {}
            None => self.retry_policy.close(context),
        }
        for listener in &self.listeners {
            listener.close(context, error);
        }
    }
}

impl Default for RetryTemplate<'_> {
    fn default() -> Self {
        Self::new()
    }
}
