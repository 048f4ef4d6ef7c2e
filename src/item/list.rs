use parking_lot::Mutex;

use crate::{
    BatchError,
    core::{
        execution_context::{ExecutionContext, ExecutionContextUserSupport},
        item::{ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
    },
};

const READ_COUNT: &str = "read.count";

/// Reads the items of a list, in order.
///
/// The number of items handed out is saved in the execution context, so a
/// restarted step resumes after the last committed item.
///
/// # Examples
///
/// ```
/// use resumable_batch::core::execution_context::ExecutionContext;
/// use resumable_batch::core::item::ItemReader;
/// use resumable_batch::item::list::ListItemReader;
///
/// let mut context = ExecutionContext::new();
/// context.put_long("customers.read.count", 2);
///
/// let reader = ListItemReader::new(vec!["ann", "bob", "cid"]).with_name("customers");
/// reader.open(&context).unwrap();
///
/// assert_eq!(reader.read().unwrap(), Some("cid"));
/// assert_eq!(reader.read().unwrap(), None);
/// ```
pub struct ListItemReader<T> {
    items: Vec<T>,
    position: Mutex<usize>,
    support: ExecutionContextUserSupport,
}

impl<T> ListItemReader<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            position: Mutex::new(0),
            support: ExecutionContextUserSupport::new("ListItemReader"),
        }
    }

    /// Namespace of the keys saved in the execution context.
    pub fn with_name(mut self, name: &str) -> Self {
        self.support = ExecutionContextUserSupport::new(name);
        self
    }

    /// Number of items read so far.
    pub fn position(&self) -> usize {
        *self.position.lock()
    }
}

impl<T: Clone + Send + Sync> ItemReader<T> for ListItemReader<T> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut position = self.position.lock();
        let item = self.items.get(*position).cloned();
        if item.is_some() {
            *position += 1;
        }
        Ok(item)
    }

    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        let position = match execution_context.get_long(&self.support.key(READ_COUNT)) {
            Some(count) => usize::try_from(count).map_err(|_| {
                BatchError::ExecutionContext(format!(
                    "invalid {} for {}: {}",
                    READ_COUNT,
                    self.support.name(),
                    count
                ))
            })?,
            None => 0,
        };
        *self.position.lock() = position;
        Ok(())
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        let position = *self.position.lock();
        execution_context.put_long(&self.support.key(READ_COUNT), position as i64);
        Ok(())
    }
}

/// Keeps every item written, in order.
pub struct ListItemWriter<T> {
    written: Mutex<Vec<T>>,
}

impl<T> ListItemWriter<T> {
    pub fn new() -> Self {
        Self {
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.written.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.lock().is_empty()
    }
}

impl<T: Clone> ListItemWriter<T> {
    pub fn items(&self) -> Vec<T> {
        self.written.lock().clone()
    }
}

impl<T> Default for ListItemWriter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send> ItemWriter<T> for ListItemWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.written.lock().extend_from_slice(items);
        Ok(())
    }
}
