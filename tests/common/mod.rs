#![allow(dead_code)]

mod mocks;

pub use mocks::*;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use resumable_batch::{
    BatchError,
    core::{
        item::{ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
        transaction::{Transaction, TransactionManager},
    },
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Writer whose writes only become visible when the surrounding transaction
/// commits. It is its own transaction manager.
#[derive(Default)]
pub struct TransactionalWriter {
    sequence: AtomicU64,
    staged: Mutex<Vec<u32>>,
    committed: Mutex<Vec<u32>>,
    rollbacks: AtomicUsize,
    /// Items to refuse, each as many times as listed.
    failures: Mutex<Vec<u32>>,
}

impl TransactionalWriter {
    pub fn failing_on(failures: Vec<u32>) -> Self {
        Self {
            failures: Mutex::new(failures),
            ..Self::default()
        }
    }

    pub fn committed(&self) -> Vec<u32> {
        self.committed.lock().clone()
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
}

impl ItemWriter<u32> for TransactionalWriter {
    fn write(&self, items: &[u32]) -> ItemWriterResult {
        let mut failures = self.failures.lock();
        if let Some(index) = failures.iter().position(|failure| items.contains(failure)) {
            let item = failures.remove(index);
            return Err(BatchError::ItemWriter(format!("cannot write {item}")));
        }
        self.staged.lock().extend_from_slice(items);
        Ok(())
    }
}

impl TransactionManager for TransactionalWriter {
    fn begin(&self) -> Result<Transaction, BatchError> {
        self.staged.lock().clear();
        Ok(Transaction::new(self.sequence.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn commit(&self, _transaction: Transaction) -> Result<(), BatchError> {
        let staged: Vec<u32> = self.staged.lock().drain(..).collect();
        self.committed.lock().extend(staged);
        Ok(())
    }

    fn rollback(&self, _transaction: Transaction) -> Result<(), BatchError> {
        self.staged.lock().clear();
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Transaction manager that refuses to commit.
pub struct BrokenTransactionManager;

impl TransactionManager for BrokenTransactionManager {
    fn begin(&self) -> Result<Transaction, BatchError> {
        Ok(Transaction::new(1))
    }

    fn commit(&self, _transaction: Transaction) -> Result<(), BatchError> {
        Err(BatchError::Transaction("connection reset".to_string()))
    }

    fn rollback(&self, _transaction: Transaction) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Processor failing on the items it is given, every time.
pub struct RejectingProcessor {
    rejected: Vec<u32>,
}

impl RejectingProcessor {
    pub fn new(rejected: Vec<u32>) -> Self {
        Self { rejected }
    }
}

impl ItemProcessor<u32, u32> for RejectingProcessor {
    fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
        if self.rejected.contains(item) {
            Err(BatchError::ItemProcessor(format!("rejected {item}")))
        } else {
            Ok(Some(*item))
        }
    }
}

/// Processor failing on given invocations, counted across all items and
/// attempts. Records how many times each item was processed successfully.
#[derive(Default)]
pub struct FlakyProcessor {
    failing_calls: Vec<usize>,
    calls: AtomicUsize,
    successes: Mutex<Vec<u32>>,
}

impl FlakyProcessor {
    pub fn failing_on_calls(failing_calls: Vec<usize>) -> Self {
        Self {
            failing_calls,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn successes(&self, item: u32) -> usize {
        self.successes.lock().iter().filter(|success| **success == item).count()
    }
}

impl ItemProcessor<u32, u32> for FlakyProcessor {
    fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.failing_calls.contains(&call) {
            return Err(BatchError::ItemProcessor(format!("call {call} failed on {item}")));
        }
        self.successes.lock().push(*item);
        Ok(Some(*item))
    }
}

/// Reader over `1..=count` that fails instead of returning the listed
/// positions.
pub struct UnreliableReader {
    count: u32,
    unreadable: Vec<u32>,
    next: Mutex<u32>,
}

impl UnreliableReader {
    pub fn new(count: u32, unreadable: Vec<u32>) -> Self {
        Self {
            count,
            unreadable,
            next: Mutex::new(1),
        }
    }
}

impl ItemReader<u32> for UnreliableReader {
    fn read(&self) -> ItemReaderResult<u32> {
        let mut next = self.next.lock();
        if *next > self.count {
            return Ok(None);
        }
        let item = *next;
        *next += 1;
        if self.unreadable.contains(&item) {
            Err(BatchError::ItemReader(format!("corrupt record {item}")))
        } else {
            Ok(Some(item))
        }
    }
}
