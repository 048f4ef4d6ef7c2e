use std::sync::Arc;

use log::{Level, debug, log};

use crate::{BatchError, classify::ErrorClassifier};

use super::context::RepeatContext;

/// Decides what happens to an error raised by a repeat callback.
///
/// Returning `Ok(())` swallows the error and lets the iteration go on;
/// returning an error ends the iteration with it.
pub trait ExceptionHandler: Send + Sync {
    fn handle_exception(&self, context: &RepeatContext<'_>, error: BatchError) -> Result<(), BatchError>;
}

/// Rethrows every error.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn handle_exception(&self, _context: &RepeatContext<'_>, error: BatchError) -> Result<(), BatchError> {
        Err(error)
    }
}

/// Tolerates a limited number of errors per iteration.
///
/// Fatal errors are always rethrown. Counted errors are swallowed until more
/// than `limit` of them have been seen; any other error is rethrown. With
/// `use_parent` the count is kept on the enclosing iteration, so that it
/// survives the nested iteration it was raised in.
#[derive(Debug, Clone)]
pub struct SimpleLimitExceptionHandler {
    limit: u64,
    counted: ErrorClassifier,
    fatal: ErrorClassifier,
    use_parent: bool,
}

impl SimpleLimitExceptionHandler {
    const COUNT_KEY: &'static str = "SimpleLimitExceptionHandler.count";

    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            counted: ErrorClassifier::always(true),
            fatal: ErrorClassifier::always(false),
            use_parent: false,
        }
    }

    pub fn counted(mut self, counted: ErrorClassifier) -> Self {
        self.counted = counted;
        self
    }

    pub fn fatal(mut self, fatal: ErrorClassifier) -> Self {
        self.fatal = fatal;
        self
    }

    pub fn use_parent(mut self, use_parent: bool) -> Self {
        self.use_parent = use_parent;
        self
    }
}

impl ExceptionHandler for SimpleLimitExceptionHandler {
    fn handle_exception(&self, context: &RepeatContext<'_>, error: BatchError) -> Result<(), BatchError> {
        if self.fatal.classify(&error) || !self.counted.classify(&error) {
            return Err(error);
        }

        let count = match (self.use_parent, context.parent()) {
            (true, Some(parent)) => parent.increment_counter(Self::COUNT_KEY, 1),
            _ => context.increment_counter(Self::COUNT_KEY, 1),
        };

        if count > self.limit {
            Err(error)
        } else {
            debug!("Ignoring error {} of {}: {}", count, self.limit, error);
            Ok(())
        }
    }
}

/// What [`LogOrRethrowExceptionHandler`] does with one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrRethrow {
    Rethrow,
    Log(Level),
}

type LevelClassifier = Arc<dyn Fn(&BatchError) -> LogOrRethrow + Send + Sync>;

/// Logs errors at a level chosen per error, or rethrows them.
#[derive(Clone)]
pub struct LogOrRethrowExceptionHandler {
    classifier: LevelClassifier,
}

impl LogOrRethrowExceptionHandler {
    pub fn new<F>(classifier: F) -> Self
    where
        F: Fn(&BatchError) -> LogOrRethrow + Send + Sync + 'static,
    {
        Self {
            classifier: Arc::new(classifier),
        }
    }
}

impl Default for LogOrRethrowExceptionHandler {
    fn default() -> Self {
        Self::new(|_| LogOrRethrow::Rethrow)
    }
}

impl ExceptionHandler for LogOrRethrowExceptionHandler {
    fn handle_exception(&self, _context: &RepeatContext<'_>, error: BatchError) -> Result<(), BatchError> {
        match (self.classifier)(&error) {
            LogOrRethrow::Rethrow => Err(error),
            LogOrRethrow::Log(level) => {
                log!(level, "Ignoring error in repeat callback: {}", error);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writer_error() -> BatchError {
        BatchError::ItemWriter("timeout".to_string())
    }

    #[test]
    fn limit_handler_rethrows_once_limit_is_passed() {
        let handler = SimpleLimitExceptionHandler::new(2);
        let context = RepeatContext::new(None);

        assert!(handler.handle_exception(&context, writer_error()).is_ok());
        assert!(handler.handle_exception(&context, writer_error()).is_ok());
        assert_eq!(handler.handle_exception(&context, writer_error()), Err(writer_error()));
    }

    #[test]
    fn limit_handler_rethrows_fatal_immediately() {
        let handler = SimpleLimitExceptionHandler::new(10)
            .fatal(ErrorClassifier::new(false).with(|e| matches!(e, BatchError::Fatal(_)), true));
        let context = RepeatContext::new(None);
        let fatal = BatchError::Fatal("disk".to_string());
        assert_eq!(handler.handle_exception(&context, fatal.clone()), Err(fatal));
    }

    #[test]
    fn limit_handler_can_count_on_parent() {
        let handler = SimpleLimitExceptionHandler::new(1).use_parent(true);
        let parent = RepeatContext::new(None);

        let first = RepeatContext::new(Some(&parent));
        assert!(handler.handle_exception(&first, writer_error()).is_ok());
        let second = RepeatContext::new(Some(&parent));
        assert!(handler.handle_exception(&second, writer_error()).is_err());
    }

    #[test]
    fn log_or_rethrow_follows_classifier() {
        let handler = LogOrRethrowExceptionHandler::new(|e| match e {
            BatchError::ItemWriter(_) => LogOrRethrow::Log(Level::Warn),
            _ => LogOrRethrow::Rethrow,
        });
        let context = RepeatContext::new(None);
        assert!(handler.handle_exception(&context, writer_error()).is_ok());
        assert!(
            handler
                .handle_exception(&context, BatchError::Step("x".to_string()))
                .is_err()
        );
    }
}
