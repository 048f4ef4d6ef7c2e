mod common;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use common::init_logger;
use resumable_batch::{
    BatchError,
    retry::{
        RetryContext, RetryListener, RetryState, RetryTemplate,
        backoff::FixedBackOffPolicy,
        policy::{NeverRetryPolicy, SimpleRetryPolicy},
    },
};

/// Calls `execute_stateful_with_recovery` until it succeeds, counting each
/// error as a rolled back transaction.
fn until_recovered<F, R>(template: &RetryTemplate, state: &RetryState, mut callback: F, mut recovery: R) -> (String, usize)
where
    F: FnMut() -> Result<String, BatchError>,
    R: FnMut() -> Result<String, BatchError>,
{
    let mut rollbacks = 0;
    loop {
        match template.execute_stateful_with_recovery(|_| callback(), |_| recovery(), state) {
            Ok(value) => return (value, rollbacks),
            Err(_) => rollbacks += 1,
        }
    }
}

#[test]
fn exhausted_stateful_retry_recovers_each_item() {
    init_logger();

    let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(1));
    let mut attempts: HashMap<&str, usize> = HashMap::new();
    let mut recovered = Vec::new();
    let mut rollbacks = 0;

    for item in ["foo", "bar"] {
        let state = RetryState::for_value(item);
        let (value, item_rollbacks) = until_recovered(
            &template,
            &state,
            || {
                *attempts.entry(item).or_default() += 1;
                Err(BatchError::ItemWriter(format!("cannot write {item}")))
            },
            || Ok(item.to_string()),
        );
        recovered.push(value);
        rollbacks += item_rollbacks;
    }

    assert_eq!(recovered, vec!["foo".to_string(), "bar".to_string()]);
    assert_eq!(rollbacks, 2);
    assert_eq!(attempts.get("foo"), Some(&1));
    assert_eq!(attempts.get("bar"), Some(&1));
}

#[test]
fn stateful_retry_runs_max_attempts_before_recovery() {
    init_logger();

    let template = RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(3));
    let state = RetryState::new(42);
    let attempts = AtomicUsize::new(0);
    let recoveries = AtomicUsize::new(0);

    let (value, rollbacks) = until_recovered(
        &template,
        &state,
        || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(BatchError::ItemWriter("deadlock".to_string()))
        },
        || {
            recoveries.fetch_add(1, Ordering::SeqCst);
            Ok("recovered".to_string())
        },
    );

    assert_eq!(value, "recovered");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(recoveries.load(Ordering::SeqCst), 1);
    assert_eq!(rollbacks, 3);
}

#[test]
fn stateless_retry_returns_the_last_error() {
    let template = RetryTemplate::new()
        .with_retry_policy(SimpleRetryPolicy::new(2))
        .with_back_off_policy(FixedBackOffPolicy::new(Duration::from_millis(1)));
    let attempts = AtomicUsize::new(0);

    let result: Result<(), BatchError> = template.execute(|context| {
        let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
        assert_eq!(context.retry_count(), attempt - 1);
        Err(BatchError::ItemReader(format!("attempt {attempt}")))
    });

    assert_eq!(result, Err(BatchError::ItemReader("attempt 2".to_string())));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn errors_outside_the_classification_are_not_retried() {
    let template = RetryTemplate::new().with_retry_policy(NeverRetryPolicy);
    let attempts = AtomicUsize::new(0);

    let result = template.execute_with_recovery(
        |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(BatchError::ItemProcessor("bad data".to_string()))
        },
        |context: &RetryContext| Ok(context.retry_count()),
    );

    assert_eq!(result, Ok(1));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

struct Veto;

impl RetryListener for Veto {
    fn open(&self, _context: &RetryContext) -> bool {
        false
    }
}

#[test]
fn listener_can_veto_the_operation() {
    let veto = Veto;
    let template = RetryTemplate::new().register_listener(&veto);
    let attempts = AtomicUsize::new(0);

    let result: Result<(), BatchError> = template.execute(|_| {
        attempts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    assert!(matches!(result, Err(BatchError::RetryTerminated(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}
