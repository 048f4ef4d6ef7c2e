use crate::error::BatchError;

use super::execution_context::ExecutionContext;

/// Represents the result of reading an item from the reader.
///
/// `Ok(None)` signals the end of the input.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Represents the result of processing an item.
///
/// `Ok(None)` means the item is filtered out and will not be written.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Represents the result of writing items.
pub type ItemWriterResult = Result<(), BatchError>;

/// A stream whose position is saved in an [`ExecutionContext`] so that a
/// later execution can resume where this one stopped.
pub trait ItemStream: Sync {
    /// Restores state saved by a previous execution, if any.
    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Saves the current position. Called before every chunk commit.
    fn update(&self, _execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// A trait for reading items.
///
/// Readers are shared by the threads of a multi-threaded step, so they take
/// `&self` and keep any cursor behind interior mutability.
pub trait ItemReader<I>: Sync {
    /// Reads the next item, or `Ok(None)` once the input is exhausted.
    fn read(&self) -> ItemReaderResult<I>;

    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// A trait for processing items.
pub trait ItemProcessor<I, O>: Sync {
    /// Transforms an item. Returning `Ok(None)` filters the item out.
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// A trait for writing items.
///
/// `write` must apply every item of the chunk or fail; the engine cannot
/// detect a partially applied chunk.
pub trait ItemWriter<O>: Sync {
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn update(&self, _execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Processor that hands every item to the writer unchanged.
#[derive(Default)]
pub struct PassThroughItemProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughItemProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

/// Exposes an [`ItemReader`] as an [`ItemStream`] so a step can manage it.
pub(crate) struct ReaderStream<'a, I>(pub &'a dyn ItemReader<I>);

impl<I> ItemStream for ReaderStream<'_, I> {
    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        self.0.open(execution_context)
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        self.0.update(execution_context)
    }

    fn close(&self) -> Result<(), BatchError> {
        self.0.close()
    }
}

/// Exposes an [`ItemWriter`] as an [`ItemStream`] so a step can manage it.
pub(crate) struct WriterStream<'a, O>(pub &'a dyn ItemWriter<O>);

impl<O> ItemStream for WriterStream<'_, O> {
    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        self.0.open(execution_context)
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        self.0.update(execution_context)
    }

    fn close(&self) -> Result<(), BatchError> {
        self.0.close()
    }
}

impl<T: ItemStream + ?Sized> ItemStream for &T {
    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        (**self).open(execution_context)
    }

    fn update(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        (**self).update(execution_context)
    }

    fn close(&self) -> Result<(), BatchError> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_through_returns_a_copy() -> Result<(), BatchError> {
        let processor = PassThroughItemProcessor;
        let item = "item".to_string();
        assert_eq!(processor.process(&item)?, Some(item));
        Ok(())
    }
}
