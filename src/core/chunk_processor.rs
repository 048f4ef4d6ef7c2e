//! Reading, processing and writing of one chunk.
//!
//! A [`ChunkProvider`] fills a chunk from the reader. A [`ChunkProcessor`]
//! transforms and writes it, keeping what it learned in a [`ChunkState`] so
//! that a chunk rolled back by one transaction can be finished by the next.
//!
//! The fault-tolerant variants add skip, retry and scan: when writing a whole
//! chunk keeps failing, the chunk is written again one item per transaction
//! until the failing item is found and skipped.

use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    BatchError,
    classify::ErrorClassifier,
    repeat::{RepeatContext, RepeatOperations, RepeatStatus, RepeatTemplate, policy::SimpleCompletionPolicy},
    retry::{RetryContext, RetryState, RetryTemplate},
};

use super::{
    chunk::Chunk,
    execution::StepContribution,
    item::{ItemProcessor, ItemProcessorResult, ItemReader, ItemReaderResult, ItemWriter, ItemWriterResult},
    listener::{ItemProcessListener, ItemReadListener, ItemWriteListener, SkipListener},
    skip::SkipPolicy,
};

/// Supplies the next chunk of input items.
pub trait ChunkProvider<I>: Sync {
    /// Read skips that end the step with an error are added to
    /// `contribution`; the others travel with the returned chunk.
    fn provide(&self, contribution: &mut StepContribution, context: &RepeatContext<'_>)
    -> Result<Chunk<I>, BatchError>;
}

/// Processes and writes a chunk, possibly over several transactions.
///
/// An `Err` means the current transaction must be rolled back. The state is
/// kept by the caller and handed back on the next call, until the chunk is
/// no longer busy and all its inputs are consumed.
pub trait ChunkProcessor<I, O>: Sync {
    fn process(&self, contribution: &mut StepContribution, state: &mut ChunkState<I, O>) -> Result<(), BatchError>;
}

type ReadErrorHandler<'h, I> = dyn Fn(&mut Chunk<I>, BatchError) -> Result<(), BatchError> + Sync + 'h;

/// Reads items until the commit interval is reached or the reader is
/// exhausted. Read errors fail the chunk.
pub struct SimpleChunkProvider<'a, I> {
    reader: &'a dyn ItemReader<I>,
    repeat: RepeatTemplate<'a>,
    commit_interval: usize,
    listeners: Vec<&'a dyn ItemReadListener<I>>,
}

impl<'a, I: Send> SimpleChunkProvider<'a, I> {
    pub fn new(reader: &'a dyn ItemReader<I>, commit_interval: usize) -> Self {
        Self {
            reader,
            repeat: RepeatTemplate::new().with_completion_policy(SimpleCompletionPolicy::new(commit_interval)),
            commit_interval,
            listeners: Vec::new(),
        }
    }

    pub fn register_listener(mut self, listener: &'a dyn ItemReadListener<I>) -> Self {
        self.listeners.push(listener);
        self
    }

    fn read(&self) -> ItemReaderResult<I> {
        for listener in &self.listeners {
            listener.before_read();
        }
        match self.reader.read() {
            Ok(Some(item)) => {
                for listener in &self.listeners {
                    listener.after_read(&item);
                }
                Ok(Some(item))
            }
            Ok(None) => Ok(None),
            Err(error) => {
                for listener in &self.listeners {
                    listener.on_read_error(&error);
                }
                Err(error)
            }
        }
    }

    fn fill(&self, context: &RepeatContext<'_>, on_error: &ReadErrorHandler<'_, I>) -> Result<Chunk<I>, BatchError> {
        let chunk = Mutex::new(Chunk::with_capacity(self.commit_interval));

        self.repeat.iterate_within(Some(context), &|_| match self.read() {
            Ok(Some(item)) => {
                chunk.lock().add(item);
                Ok(RepeatStatus::Continuable)
            }
            Ok(None) => {
                debug!("End of input reached");
                chunk.lock().set_end();
                Ok(RepeatStatus::Finished)
            }
            Err(error) => {
                on_error(&mut chunk.lock(), error)?;
                Ok(RepeatStatus::Continuable)
            }
        })?;

        Ok(chunk.into_inner())
    }
}

impl<I: Send> ChunkProvider<I> for SimpleChunkProvider<'_, I> {
    fn provide(
        &self,
        _contribution: &mut StepContribution,
        context: &RepeatContext<'_>,
    ) -> Result<Chunk<I>, BatchError> {
        self.fill(context, &|_, error| Err(error))
    }
}

/// Chunk provider that skips read errors accepted by its skip policy.
///
/// A skipped read is recorded on the chunk and only counted once the chunk
/// is complete.
pub struct FaultTolerantChunkProvider<'a, I> {
    delegate: SimpleChunkProvider<'a, I>,
    skip_policy: Arc<dyn SkipPolicy + 'a>,
}

impl<'a, I: Send> FaultTolerantChunkProvider<'a, I> {
    pub fn new(delegate: SimpleChunkProvider<'a, I>, skip_policy: Arc<dyn SkipPolicy + 'a>) -> Self {
        Self { delegate, skip_policy }
    }
}

impl<I: Send> ChunkProvider<I> for FaultTolerantChunkProvider<'_, I> {
    fn provide(
        &self,
        contribution: &mut StepContribution,
        context: &RepeatContext<'_>,
    ) -> Result<Chunk<I>, BatchError> {
        let step_skip_count = contribution.step_skip_count();
        let skipped = AtomicUsize::new(0);

        let chunk = self.delegate.fill(context, &|chunk, error| {
            let skip_count = step_skip_count + chunk.skips().len();
            if self.skip_policy.should_skip(&error, Some(skip_count))? {
                warn!("Skipping failed read: {}", error);
                chunk.skip(error);
                skipped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            } else {
                Err(error)
            }
        });

        if chunk.is_err() {
            contribution.read_skip_count += skipped.into_inner();
        }
        chunk
    }
}

/// Progress of one chunk across the transactions needed to complete it.
///
/// Outputs are aligned with the first inputs: `outputs[i]` is the result of
/// processing `inputs[i]`. Filtered and skipped inputs are removed from the
/// chunk as soon as they are known, so they are never processed twice.
#[derive(Debug)]
pub struct ChunkState<I, O> {
    inputs: Chunk<I>,
    outputs: Chunk<O>,
    keys: Vec<u64>,
    chunk_key: Option<u64>,
    read_count: usize,
    filter_count: usize,
    rolled_back: bool,
}

impl<I, O> ChunkState<I, O> {
    pub fn new(inputs: Chunk<I>) -> Self {
        Self {
            read_count: inputs.len(),
            inputs,
            outputs: Chunk::new(),
            keys: Vec::new(),
            chunk_key: None,
            filter_count: 0,
            rolled_back: false,
        }
    }

    pub fn inputs(&self) -> &Chunk<I> {
        &self.inputs
    }

    pub fn outputs(&self) -> &Chunk<O> {
        &self.outputs
    }

    /// The reader was exhausted while filling this chunk.
    pub fn is_end(&self) -> bool {
        self.inputs.is_end()
    }

    /// The chunk is being scanned and needs more transactions.
    pub fn is_busy(&self) -> bool {
        self.inputs.is_busy()
    }

    pub fn is_complete(&self) -> bool {
        self.inputs.is_empty() && !self.inputs.is_busy()
    }

    pub(crate) fn mark_rolled_back(&mut self) {
        self.rolled_back = true;
    }

    /// Skips recorded on this chunk and not yet counted by the step.
    fn pending_skip_count(&self) -> usize {
        self.inputs.skips().len() + self.outputs.skips().len()
    }

    fn assign_keys(&mut self, sequence: &AtomicU64) -> u64 {
        while self.keys.len() < self.inputs.len() {
            self.keys.push(sequence.fetch_add(1, Ordering::Relaxed));
        }
        *self
            .chunk_key
            .get_or_insert_with(|| sequence.fetch_add(1, Ordering::Relaxed))
    }

    fn remove_input(&mut self, index: usize) {
        self.inputs.remove(index);
        if index < self.keys.len() {
            self.keys.remove(index);
        }
    }

    /// Adds the counts of the completed chunk to `contribution` and reports
    /// its skipped items.
    fn finish(&mut self, contribution: &mut StepContribution, listeners: &[&dyn SkipListener<I, O>]) {
        contribution.increment_read_count(self.read_count);
        contribution.increment_filter_count(self.filter_count);

        for skip in self.inputs.take_skips() {
            match &skip.item {
                None => {
                    contribution.increment_read_skip_count();
                    for listener in listeners {
                        listener.on_skip_in_read(&skip.error);
                    }
                }
                Some(item) => {
                    contribution.increment_process_skip_count();
                    for listener in listeners {
                        listener.on_skip_in_process(item, &skip.error);
                    }
                }
            }
        }

        for skip in self.outputs.take_skips() {
            contribution.increment_write_skip_count();
            if let Some(item) = &skip.item {
                for listener in listeners {
                    listener.on_skip_in_write(item, &skip.error);
                }
            }
        }
    }

    /// Adds the skips recorded so far to `contribution` when the chunk ends
    /// the step instead of completing. Skip listeners are not called.
    fn count_skips(&mut self, contribution: &mut StepContribution) {
        for skip in self.inputs.take_skips() {
            match skip.item {
                None => contribution.increment_read_skip_count(),
                Some(_) => contribution.increment_process_skip_count(),
            }
        }
        for _ in self.outputs.take_skips() {
            contribution.increment_write_skip_count();
        }
    }
}

fn process_item<I, O>(
    processor: &dyn ItemProcessor<I, O>,
    listeners: &[&dyn ItemProcessListener<I, O>],
    item: &I,
) -> ItemProcessorResult<O> {
    for listener in listeners {
        listener.before_process(item);
    }
    match processor.process(item) {
        Ok(output) => {
            for listener in listeners {
                listener.after_process(item, output.as_ref());
            }
            Ok(output)
        }
        Err(error) => {
            for listener in listeners {
                listener.on_process_error(item, &error);
            }
            Err(error)
        }
    }
}

fn write_items<O>(writer: &dyn ItemWriter<O>, listeners: &[&dyn ItemWriteListener<O>], items: &[O]) -> ItemWriterResult {
    for listener in listeners {
        listener.before_write(items);
    }
    match writer.write(items).and_then(|()| writer.flush()) {
        Ok(()) => {
            for listener in listeners {
                listener.after_write(items);
            }
            Ok(())
        }
        Err(error) => {
            for listener in listeners {
                listener.on_write_error(&error, items);
            }
            Err(error)
        }
    }
}

/// Processes every item then writes the chunk. Any error fails the chunk.
pub struct SimpleChunkProcessor<'a, I, O> {
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    process_listeners: Vec<&'a dyn ItemProcessListener<I, O>>,
    write_listeners: Vec<&'a dyn ItemWriteListener<O>>,
}

impl<'a, I, O> SimpleChunkProcessor<'a, I, O> {
    pub fn new(processor: &'a dyn ItemProcessor<I, O>, writer: &'a dyn ItemWriter<O>) -> Self {
        Self {
            processor,
            writer,
            process_listeners: Vec::new(),
            write_listeners: Vec::new(),
        }
    }

    pub fn register_process_listener(mut self, listener: &'a dyn ItemProcessListener<I, O>) -> Self {
        self.process_listeners.push(listener);
        self
    }

    pub fn register_write_listener(mut self, listener: &'a dyn ItemWriteListener<O>) -> Self {
        self.write_listeners.push(listener);
        self
    }
}

impl<I, O> ChunkProcessor<I, O> for SimpleChunkProcessor<'_, I, O> {
    fn process(&self, contribution: &mut StepContribution, state: &mut ChunkState<I, O>) -> Result<(), BatchError> {
        let mut index = state.outputs.len();
        while index < state.inputs.len() {
            match process_item(self.processor, &self.process_listeners, &state.inputs.items()[index])? {
                Some(output) => {
                    state.outputs.add(output);
                    index += 1;
                }
                None => {
                    state.remove_input(index);
                    state.filter_count += 1;
                }
            }
        }

        if !state.outputs.is_empty() {
            write_items(self.writer, &self.write_listeners, state.outputs.items())?;
            contribution.increment_write_count(state.outputs.len());
        }
        state.outputs.take_items();
        state.inputs.take_items();
        state.finish(contribution, &[]);
        Ok(())
    }
}

enum ProcessOutcome<O> {
    Output(O),
    Filtered,
    Skipped(BatchError),
}

enum WriteOutcome {
    Written,
    Scan,
}

/// Errors that end the step instead of asking for another attempt.
fn is_terminal(error: &BatchError) -> bool {
    matches!(
        error,
        BatchError::RetryExhausted(_)
            | BatchError::SkipLimitExceeded { .. }
            | BatchError::NonSkippable(_)
            | BatchError::RetryCacheCapacityExceeded(_)
            | BatchError::RetryTerminated(_)
            | BatchError::ChunkRetry(_)
            | BatchError::Fatal(_)
    )
}

fn retry_chunk(error: BatchError) -> BatchError {
    if is_terminal(&error) {
        error
    } else {
        BatchError::ChunkRetry(Box::new(error))
    }
}

fn last_error(context: &RetryContext) -> Result<&BatchError, BatchError> {
    context
        .last_error()
        .ok_or_else(|| BatchError::RetryTerminated("Recovery called without a failed attempt".to_string()))
}

/// Chunk processor with skip and stateful retry.
///
/// Each item is processed under a retry keyed by its position in the read
/// sequence, and the chunk is written under a retry keyed by the chunk. A
/// failure that must be rolled back is returned as
/// `BatchError::ChunkRetry`, and the same chunk comes back in the next
/// transaction. Outputs processed before the rollback are reused unless the
/// processor is transactional.
///
/// Once retries of the chunk write are exhausted with a skippable error, the
/// chunk is scanned: its items are written one per transaction, and the item
/// that fails is skipped.
pub struct FaultTolerantChunkProcessor<'a, I, O> {
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    skip_policy: Arc<dyn SkipPolicy + 'a>,
    retry_template: RetryTemplate<'a>,
    rollback_classifier: ErrorClassifier,
    processor_transactional: bool,
    process_listeners: Vec<&'a dyn ItemProcessListener<I, O>>,
    write_listeners: Vec<&'a dyn ItemWriteListener<O>>,
    skip_listeners: Vec<&'a dyn SkipListener<I, O>>,
    sequence: AtomicU64,
}

impl<'a, I, O> FaultTolerantChunkProcessor<'a, I, O> {
    pub fn new(
        processor: &'a dyn ItemProcessor<I, O>,
        writer: &'a dyn ItemWriter<O>,
        skip_policy: Arc<dyn SkipPolicy + 'a>,
        retry_template: RetryTemplate<'a>,
    ) -> Self {
        Self {
            processor,
            writer,
            skip_policy,
            retry_template,
            rollback_classifier: ErrorClassifier::always(true),
            processor_transactional: false,
            process_listeners: Vec::new(),
            write_listeners: Vec::new(),
            skip_listeners: Vec::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Processing errors classified `false` do not roll the chunk back: they
    /// are retried in place, then skipped.
    pub fn with_rollback_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.rollback_classifier = classifier;
        self
    }

    pub fn with_processor_transactional(mut self, processor_transactional: bool) -> Self {
        self.processor_transactional = processor_transactional;
        self
    }

    pub fn register_process_listener(mut self, listener: &'a dyn ItemProcessListener<I, O>) -> Self {
        self.process_listeners.push(listener);
        self
    }

    pub fn register_write_listener(mut self, listener: &'a dyn ItemWriteListener<O>) -> Self {
        self.write_listeners.push(listener);
        self
    }

    pub fn register_skip_listener(mut self, listener: &'a dyn SkipListener<I, O>) -> Self {
        self.skip_listeners.push(listener);
        self
    }

    fn process_or_skip(&self, item: &I, skip_count: usize) -> Result<ProcessOutcome<O>, BatchError> {
        match process_item(self.processor, &self.process_listeners, item) {
            Ok(Some(output)) => Ok(ProcessOutcome::Output(output)),
            Ok(None) => Ok(ProcessOutcome::Filtered),
            Err(error) if self.rollback_classifier.classify(&error) => Err(error),
            Err(error) => {
                if self.skip_policy.should_skip(&error, Some(skip_count))? {
                    debug!("Skipping after failed process with no rollback: {}", error);
                    Ok(ProcessOutcome::Skipped(error))
                } else {
                    Err(BatchError::NonSkippable(Box::new(error)))
                }
            }
        }
    }

    fn recover_process(&self, context: &RetryContext, skip_count: usize) -> Result<ProcessOutcome<O>, BatchError> {
        let error = last_error(context)?;
        if self.skip_policy.should_skip(error, Some(skip_count))? {
            Ok(ProcessOutcome::Skipped(error.clone()))
        } else {
            Err(BatchError::NonSkippable(Box::new(error.clone())))
        }
    }

    fn transform(&self, contribution: &StepContribution, state: &mut ChunkState<I, O>) -> Result<(), BatchError> {
        let mut index = state.outputs.len();
        while index < state.inputs.len() {
            let skip_count = contribution.step_skip_count() + state.pending_skip_count();
            let retry_state =
                RetryState::new(state.keys[index]).with_rollback_classifier(self.rollback_classifier.clone());
            let item = &state.inputs.items()[index];

            let outcome = self
                .retry_template
                .execute_stateful_with_recovery(
                    |_| self.process_or_skip(item, skip_count),
                    |context| self.recover_process(context, skip_count),
                    &retry_state,
                )
                .map_err(retry_chunk)?;

            match outcome {
                ProcessOutcome::Output(output) => {
                    state.outputs.add(output);
                    index += 1;
                }
                ProcessOutcome::Filtered => {
                    state.remove_input(index);
                    state.filter_count += 1;
                }
                ProcessOutcome::Skipped(error) => {
                    warn!("Skipping item after failed process: {}", error);
                    state.inputs.skip_at(index, error);
                    state.keys.remove(index);
                }
            }
        }
        Ok(())
    }

    fn write(
        &self,
        contribution: &mut StepContribution,
        state: &mut ChunkState<I, O>,
        chunk_key: u64,
    ) -> Result<(), BatchError> {
        if state.outputs.is_empty() {
            return Ok(());
        }

        let outputs = state.outputs.items();
        let outcome = self
            .retry_template
            .execute_stateful_with_recovery(
                |_| write_items(self.writer, &self.write_listeners, outputs).map(|()| WriteOutcome::Written),
                |context| {
                    let error = last_error(context)?;
                    if self.skip_policy.should_skip(error, None)? {
                        Ok(WriteOutcome::Scan)
                    } else {
                        Err(BatchError::RetryExhausted(Box::new(error.clone())))
                    }
                },
                &RetryState::new(chunk_key),
            )
            .map_err(retry_chunk)?;

        match outcome {
            WriteOutcome::Written => {
                contribution.increment_write_count(state.outputs.len());
                state.outputs.take_items();
                state.inputs.take_items();
                state.keys.clear();
                Ok(())
            }
            WriteOutcome::Scan => {
                debug!("Write retries exhausted, scanning {} items", state.outputs.len());
                state.inputs.set_busy(true);
                self.scan(contribution, state)
            }
        }
    }

    fn transform_and_write(
        &self,
        contribution: &mut StepContribution,
        state: &mut ChunkState<I, O>,
        chunk_key: u64,
    ) -> Result<(), BatchError> {
        self.transform(contribution, state)?;
        if state.inputs.is_busy() {
            self.scan(contribution, state)
        } else {
            self.write(contribution, state, chunk_key)
        }
    }

    /// Writes the first remaining item on its own.
    fn scan(&self, contribution: &mut StepContribution, state: &mut ChunkState<I, O>) -> Result<(), BatchError> {
        if state.outputs.is_empty() {
            state.inputs.set_busy(false);
            return Ok(());
        }

        match write_items(self.writer, &self.write_listeners, &state.outputs.items()[..1]) {
            Ok(()) => {
                contribution.increment_write_count(1);
                state.outputs.remove(0);
                state.remove_input(0);
            }
            Err(error) => {
                let skip_count = contribution.step_skip_count() + state.pending_skip_count();
                if !self.skip_policy.should_skip(&error, Some(skip_count))? {
                    return Err(BatchError::NonSkippable(Box::new(error)));
                }
                warn!("Skipping item after failed write: {}", error);
                state.remove_input(0);
                state.outputs.skip_at(0, error.clone());
                return Err(BatchError::ChunkRetry(Box::new(error)));
            }
        }

        if state.outputs.is_empty() {
            state.inputs.set_busy(false);
        }
        Ok(())
    }
}

impl<I, O> ChunkProcessor<I, O> for FaultTolerantChunkProcessor<'_, I, O> {
    fn process(&self, contribution: &mut StepContribution, state: &mut ChunkState<I, O>) -> Result<(), BatchError> {
        let chunk_key = state.assign_keys(&self.sequence);
        if state.rolled_back && self.processor_transactional {
            debug!("Discarding {} cached outputs after rollback", state.outputs.len());
            state.outputs.take_items();
        }
        state.rolled_back = false;

        if let Err(error) = self.transform_and_write(contribution, state, chunk_key) {
            if !matches!(error, BatchError::ChunkRetry(_)) {
                state.count_skips(contribution);
            }
            return Err(error);
        }

        if state.is_complete() {
            state.finish(contribution, &self.skip_listeners);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use crate::{
        core::{
            item::PassThroughItemProcessor,
            skip::{AlwaysSkipItemSkipPolicy, LimitCheckingItemSkipPolicy},
        },
        item::list::{ListItemReader, ListItemWriter},
        retry::policy::SimpleRetryPolicy,
    };

    use super::*;

    struct FailingWriter {
        poison: u32,
        inner: ListItemWriter<u32>,
    }

    impl ItemWriter<u32> for FailingWriter {
        fn write(&self, items: &[u32]) -> ItemWriterResult {
            if items.contains(&self.poison) {
                return Err(BatchError::ItemWriter(format!("cannot write {}", self.poison)));
            }
            self.inner.write(items)
        }
    }

    fn run_chunk<P: ChunkProcessor<u32, u32>>(
        processor: &P,
        inputs: Vec<u32>,
    ) -> (StepContribution, Vec<Result<(), BatchError>>) {
        let mut contribution = StepContribution::default();
        let mut state = ChunkState::new(Chunk::from_items(inputs));
        let mut attempts = Vec::new();
        loop {
            let result = processor.process(&mut contribution, &mut state);
            let done = match &result {
                Ok(()) => state.is_complete(),
                Err(BatchError::ChunkRetry(_)) => {
                    state.mark_rolled_back();
                    false
                }
                Err(_) => true,
            };
            attempts.push(result);
            if done {
                break;
            }
        }
        (contribution, attempts)
    }

    #[test]
    fn provider_stops_at_commit_interval() -> Result<(), BatchError> {
        let reader = ListItemReader::new(vec![1, 2, 3]);
        let provider = SimpleChunkProvider::new(&reader, 2);
        let context = RepeatContext::new(None);

        let first = provider.provide(&mut StepContribution::default(), &context)?;
        let second = provider.provide(&mut StepContribution::default(), &context)?;

        assert_eq!(first.items(), &[1, 2]);
        assert!(!first.is_end());
        assert_eq!(second.items(), &[3]);
        assert!(second.is_end());
        Ok(())
    }

    #[test]
    fn simple_processor_counts_filtered_items() -> Result<(), BatchError> {
        struct EvenOnly;
        impl ItemProcessor<u32, u32> for EvenOnly {
            fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
                Ok((item % 2 == 0).then_some(*item))
            }
        }
        let writer: ListItemWriter<u32> = ListItemWriter::new();
        let processor = SimpleChunkProcessor::new(&EvenOnly, &writer);
        let mut contribution = StepContribution::default();
        let mut state = ChunkState::new(Chunk::from_items(vec![1, 2, 3, 4]));

        processor.process(&mut contribution, &mut state)?;

        assert_eq!(writer.items(), vec![2, 4]);
        assert_eq!(contribution.read_count, 4);
        assert_eq!(contribution.filter_count, 2);
        assert_eq!(contribution.write_count, 2);
        assert!(state.is_complete());
        Ok(())
    }

    #[test]
    fn write_failure_is_isolated_by_scanning() {
        let writer = FailingWriter {
            poison: 2,
            inner: ListItemWriter::new(),
        };
        let processor = FaultTolerantChunkProcessor::new(
            &PassThroughItemProcessor,
            &writer,
            Arc::new(AlwaysSkipItemSkipPolicy),
            RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(1)),
        );

        let (contribution, attempts) = run_chunk(&processor, vec![1, 2, 3]);

        let rollbacks = attempts.iter().filter(|result| result.is_err()).count();
        assert_eq!(rollbacks, 2);
        assert_eq!(writer.inner.items(), vec![1, 3]);
        assert_eq!(contribution.write_count, 2);
        assert_eq!(contribution.write_skip_count, 1);
        assert_eq!(contribution.read_count, 3);
    }

    #[test]
    fn processed_outputs_survive_a_rollback() {
        struct CountingProcessor {
            calls: Mutex<Vec<u32>>,
            fail_once: AtomicBool,
        }
        impl ItemProcessor<u32, u32> for CountingProcessor {
            fn process(&self, item: &u32) -> ItemProcessorResult<u32> {
                self.calls.lock().push(*item);
                if *item == 2 && self.fail_once.swap(false, Ordering::SeqCst) {
                    return Err(BatchError::ItemProcessor("transient".to_string()));
                }
                Ok(Some(*item))
            }
        }

        let item_processor = CountingProcessor {
            calls: Mutex::new(Vec::new()),
            fail_once: AtomicBool::new(true),
        };
        let writer: ListItemWriter<u32> = ListItemWriter::new();
        let processor = FaultTolerantChunkProcessor::new(
            &item_processor,
            &writer,
            Arc::new(LimitCheckingItemSkipPolicy::new(0, ErrorClassifier::always(false))),
            RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(3)),
        );

        let (contribution, attempts) = run_chunk(&processor, vec![1, 2, 3]);

        assert_eq!(attempts.len(), 2);
        assert!(matches!(attempts[0], Err(BatchError::ChunkRetry(_))));
        assert_eq!(item_processor.calls.lock().clone(), vec![1, 2, 2, 3]);
        assert_eq!(writer.items(), vec![1, 2, 3]);
        assert_eq!(contribution.write_count, 3);
    }

    #[test]
    fn non_skippable_write_failure_exhausts_retry() {
        let writer = FailingWriter {
            poison: 1,
            inner: ListItemWriter::new(),
        };
        let processor = FaultTolerantChunkProcessor::new(
            &PassThroughItemProcessor,
            &writer,
            Arc::new(LimitCheckingItemSkipPolicy::new(10, ErrorClassifier::always(false))),
            RetryTemplate::new().with_retry_policy(SimpleRetryPolicy::new(2)),
        );

        let (_, attempts) = run_chunk(&processor, vec![1]);

        assert_eq!(attempts.len(), 3);
        assert!(matches!(attempts[2], Err(BatchError::RetryExhausted(_))));
        assert!(writer.inner.items().is_empty());
    }
}
