use std::collections::VecDeque;

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::{
    BatchError,
    repeat::{RepeatContext, RepeatStatus},
};

use super::{
    chunk_processor::{ChunkProcessor, ChunkProvider, ChunkState},
    execution::StepContribution,
    execution_context::ExecutionContext,
};

/// The unit of work of a [`TaskletStep`](super::step::TaskletStep).
///
/// `execute` is called repeatedly, each call in its own transaction, until
/// it returns [`RepeatStatus::Finished`]. Counts are reported through the
/// contribution, which is applied to the step only if the transaction
/// commits.
pub trait Tasklet: Sync {
    fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &RepeatContext<'_>,
    ) -> Result<RepeatStatus, BatchError>;

    /// Called when the step starts, before the first transaction.
    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        Ok(())
    }

    /// Called when the step ends, whatever its outcome.
    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Tasklet that reads, processes and writes one chunk per transaction.
///
/// A chunk whose transaction was rolled back, or that is still being
/// scanned, is kept and resumed by the next call instead of reading new
/// items.
///
/// When calls run on several threads, a call that reaches the end of input
/// waits for the chunks still in flight on other threads. It reports
/// `Finished` only once none of them was sent back for another transaction.
pub struct ChunkOrientedTasklet<'a, I, O> {
    provider: Box<dyn ChunkProvider<I> + 'a>,
    processor: Box<dyn ChunkProcessor<I, O> + 'a>,
    backlog: Mutex<Backlog<I, O>>,
    settled: Condvar,
}

struct Backlog<I, O> {
    pending: VecDeque<ChunkState<I, O>>,
    in_flight: usize,
}

impl<'a, I, O> ChunkOrientedTasklet<'a, I, O> {
    pub fn new(provider: impl ChunkProvider<I> + 'a, processor: impl ChunkProcessor<I, O> + 'a) -> Self {
        Self {
            provider: Box::new(provider),
            processor: Box::new(processor),
            backlog: Mutex::new(Backlog {
                pending: VecDeque::new(),
                in_flight: 0,
            }),
            settled: Condvar::new(),
        }
    }

    /// Number of chunks waiting for another transaction.
    pub fn pending_chunks(&self) -> usize {
        self.backlog.lock().pending.len()
    }

    /// Takes a chunk left by an earlier transaction, if any, and counts the
    /// caller as in flight.
    fn claim(&self) -> Option<ChunkState<I, O>> {
        let mut backlog = self.backlog.lock();
        backlog.in_flight += 1;
        backlog.pending.pop_front()
    }

    /// Ends the caller's flight, keeping `state` for another transaction.
    /// Returns whether the step has more work.
    fn release(&self, state: Option<ChunkState<I, O>>, end: bool) -> bool {
        let mut backlog = self.backlog.lock();
        if let Some(state) = state {
            backlog.pending.push_back(state);
        }
        backlog.in_flight -= 1;
        self.settled.notify_all();

        if !end {
            return true;
        }
        while backlog.in_flight > 0 && backlog.pending.is_empty() {
            debug!("End of input, waiting for {} chunks in flight", backlog.in_flight);
            self.settled.wait(&mut backlog);
        }
        !backlog.pending.is_empty()
    }
}

impl<I: Send, O: Send> Tasklet for ChunkOrientedTasklet<'_, I, O> {
    fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &RepeatContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let mut state = match self.claim() {
            Some(state) => {
                debug!("Resuming chunk of {} items", state.inputs().len());
                state
            }
            None => match self.provider.provide(contribution, context) {
                Ok(chunk) => ChunkState::new(chunk),
                Err(error) => {
                    self.release(None, false);
                    return Err(error);
                }
            },
        };

        if let Err(error) = self.processor.process(contribution, &mut state) {
            state.mark_rolled_back();
            self.release(Some(state), false);
            return Err(error);
        }

        if state.is_busy() {
            debug!("Chunk still busy, continuing in a new transaction");
            contribution.set_chunk_pending(true);
            self.release(Some(state), false);
            return Ok(RepeatStatus::Continuable);
        }

        let more = self.release(None, state.is_end());
        Ok(RepeatStatus::continue_if(more))
    }

    fn open(&self, _execution_context: &ExecutionContext) -> Result<(), BatchError> {
        let mut backlog = self.backlog.lock();
        backlog.pending.clear();
        backlog.in_flight = 0;
        Ok(())
    }
}

impl<T: Tasklet + ?Sized> Tasklet for &T {
    fn execute(
        &self,
        contribution: &mut StepContribution,
        context: &RepeatContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        (**self).execute(contribution, context)
    }

    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        (**self).open(execution_context)
    }

    fn close(&self) -> Result<(), BatchError> {
        (**self).close()
    }
}
