//! Callbacks invoked around jobs, steps, chunks and items.
//!
//! Every method has an empty default so that implementations only override
//! what they need. Components hold listeners in a `Vec` and call them in
//! registration order.

use crate::BatchError;

use super::{
    execution::{JobExecution, StepExecution},
    status::ExitStatus,
};

pub trait JobExecutionListener: Sync {
    fn before_job(&self, _job_execution: &mut JobExecution) {}

    /// Always called, whatever the outcome of the job.
    fn after_job(&self, _job_execution: &mut JobExecution) {}
}

pub trait StepExecutionListener: Sync {
    fn before_step(&self, _step_execution: &mut StepExecution) {}

    /// May return an exit status that is combined with the step's own.
    fn after_step(&self, _step_execution: &StepExecution) -> Option<ExitStatus> {
        None
    }

    fn on_error(&self, _step_execution: &StepExecution, _error: &BatchError) {}
}

/// Called around each chunk transaction.
pub trait ChunkListener: Sync {
    fn before_chunk(&self) {}

    fn after_chunk(&self) {}

    /// Called after the chunk transaction was rolled back.
    fn after_chunk_error(&self, _error: &BatchError) {}
}

pub trait ItemReadListener<I>: Sync {
    fn before_read(&self) {}

    fn after_read(&self, _item: &I) {}

    fn on_read_error(&self, _error: &BatchError) {}
}

pub trait ItemProcessListener<I, O>: Sync {
    fn before_process(&self, _item: &I) {}

    /// `result` is `None` when the item was filtered.
    fn after_process(&self, _item: &I, _result: Option<&O>) {}

    fn on_process_error(&self, _item: &I, _error: &BatchError) {}
}

pub trait ItemWriteListener<O>: Sync {
    fn before_write(&self, _items: &[O]) {}

    fn after_write(&self, _items: &[O]) {}

    fn on_write_error(&self, _error: &BatchError, _items: &[O]) {}
}

/// Told about every skipped item once the chunk holding it has committed.
pub trait SkipListener<I, O>: Sync {
    fn on_skip_in_read(&self, _error: &BatchError) {}

    fn on_skip_in_process(&self, _item: &I, _error: &BatchError) {}

    fn on_skip_in_write(&self, _item: &O, _error: &BatchError) {}
}
