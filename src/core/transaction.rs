use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::BatchError;

/// Handle to a transaction opened by a [`TransactionManager`].
#[derive(Debug, PartialEq, Eq)]
pub struct Transaction {
    id: u64,
}

impl Transaction {
    pub fn new(id: u64) -> Self {
        Self { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Demarcates the transaction of each chunk.
///
/// A step only decides when to begin, commit or roll back; what a
/// transaction means is up to the implementation. A failed commit or
/// rollback leaves the step in `UNKNOWN` status.
pub trait TransactionManager: Sync {
    fn begin(&self) -> Result<Transaction, BatchError>;

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError>;

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError>;
}

/// Transaction manager for steps without a transactional resource.
#[derive(Debug, Default)]
pub struct ResourcelessTransactionManager {
    sequence: AtomicU64,
}

impl ResourcelessTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransactionManager for ResourcelessTransactionManager {
    fn begin(&self) -> Result<Transaction, BatchError> {
        let id = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Transaction::new(id))
    }

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError> {
        debug!("Committing resourceless transaction {}", transaction.id());
        Ok(())
    }

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError> {
        debug!("Rolling back resourceless transaction {}", transaction.id());
        Ok(())
    }
}
impl<T: TransactionManager + ?Sized> TransactionManager for &T {
    fn begin(&self) -> Result<Transaction, BatchError> {
        (**self).begin()
    }

    fn commit(&self, transaction: Transaction) -> Result<(), BatchError> {
        (**self).commit(transaction)
    }

    fn rollback(&self, transaction: Transaction) -> Result<(), BatchError> {
        (**self).rollback(transaction)
    }
}
