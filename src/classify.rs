//! # Error classification
//!
//! Retry, skip and rollback decisions all reduce to the same question: does
//! this error belong to a given category? An [`ErrorClassifier`] answers it
//! with an ordered list of predicate rules and a default.

use std::{fmt, sync::Arc};

use crate::BatchError;

type Predicate = Arc<dyn Fn(&BatchError) -> bool + Send + Sync>;

/// Maps a [`BatchError`] to `true` or `false` using ordered rules.
///
/// The first rule whose predicate matches the error decides the outcome. When
/// no rule matches, the classifier falls back to its default value.
///
/// # Examples
///
/// ```
/// use resumable_batch::{BatchError, classify::ErrorClassifier};
///
/// let retryable = ErrorClassifier::new(false)
///     .with(|e| matches!(e, BatchError::ItemWriter(_)), true);
///
/// assert!(retryable.classify(&BatchError::ItemWriter("timeout".to_string())));
/// assert!(!retryable.classify(&BatchError::ItemReader("corrupt".to_string())));
/// ```
#[derive(Clone)]
pub struct ErrorClassifier {
    rules: Vec<(Predicate, bool)>,
    default_value: bool,
}

impl ErrorClassifier {
    /// Creates a classifier with no rules and the given default.
    pub fn new(default_value: bool) -> Self {
        Self {
            rules: Vec::new(),
            default_value,
        }
    }

    /// Creates a classifier that answers `value` for every error.
    pub fn always(value: bool) -> Self {
        Self::new(value)
    }

    /// Appends a rule. Rules are evaluated in the order they were added.
    pub fn with<F>(mut self, predicate: F, value: bool) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.rules.push((Arc::new(predicate), value));
        self
    }

    /// Classifies an error.
    pub fn classify(&self, error: &BatchError) -> bool {
        self.rules
            .iter()
            .find(|(predicate, _)| predicate(error))
            .map(|(_, value)| *value)
            .unwrap_or(self.default_value)
    }

    pub fn default_value(&self) -> bool {
        self.default_value
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("rules", &self.rules.len())
            .field("default_value", &self.default_value)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let classifier = ErrorClassifier::new(false)
            .with(|e| matches!(e, BatchError::ItemWriter(msg) if msg == "fatal"), false)
            .with(|e| matches!(e, BatchError::ItemWriter(_)), true);

        assert!(!classifier.classify(&BatchError::ItemWriter("fatal".to_string())));
        assert!(classifier.classify(&BatchError::ItemWriter("transient".to_string())));
    }

    #[test]
    fn falls_back_to_default() {
        let classifier = ErrorClassifier::always(true);
        assert!(classifier.is_empty());
        assert!(classifier.classify(&BatchError::Step("any".to_string())));
    }
}
