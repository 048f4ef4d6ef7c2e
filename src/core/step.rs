use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;

use crate::{
    BatchError,
    classify::ErrorClassifier,
    repeat::{
        RepeatContext, RepeatOperations, RepeatStatus, RepeatTemplate, TaskExecutorRepeatTemplate,
        exception::{DefaultExceptionHandler, ExceptionHandler},
    },
    repository::JobRepository,
    retry::{
        RetryListener, RetryTemplate,
        backoff::BackOffPolicy,
        cache::MapRetryContextCache,
        policy::{RetryPolicy, SimpleRetryPolicy},
    },
};

use super::{
    chunk_processor::{
        FaultTolerantChunkProcessor, FaultTolerantChunkProvider, SimpleChunkProcessor, SimpleChunkProvider,
    },
    execution::{StepContribution, StepExecution},
    execution_context::ExecutionContext,
    item::{ItemProcessor, ItemReader, ItemStream, ItemWriter, PassThroughItemProcessor, ReaderStream, WriterStream},
    listener::{
        ChunkListener, ItemProcessListener, ItemReadListener, ItemWriteListener, SkipListener, StepExecutionListener,
    },
    skip::{LimitCheckingItemSkipPolicy, SkipPolicy},
    status::{BatchStatus, ExitStatus},
    tasklet::{ChunkOrientedTasklet, Tasklet},
    transaction::{ResourcelessTransactionManager, Transaction, TransactionManager},
};

/// An independent phase of a job.
pub trait Step: Sync {
    fn name(&self) -> &str;

    /// Number of times the step may be started for one job instance.
    fn start_limit(&self) -> usize {
        usize::MAX
    }

    /// Whether the step runs again when the job is restarted after it
    /// completed.
    fn is_allow_start_if_complete(&self) -> bool {
        false
    }

    /// Runs the step, recording its outcome in `step_execution`.
    ///
    /// # Errors
    /// Returns the failure when the step ends `FAILED` or `UNKNOWN`. A step
    /// stopped on request ends `STOPPED` and returns `Ok`.
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// Step that calls its [`Tasklet`] repeatedly, one transaction per call,
/// until the tasklet reports it is finished.
///
/// Each transaction creates a [`StepContribution`] and hands it to the
/// tasklet. When the tasklet succeeds, the contribution is applied to the
/// step execution, the streams save their position and the step execution
/// is persisted before the transaction commits. When it fails, the
/// transaction is rolled back and only the rollback count changes.
///
/// With a throttle limit the transactions run on several threads; updates
/// of the step execution are serialized.
pub struct TaskletStep<'a> {
    name: String,
    tasklet: Box<dyn Tasklet + 'a>,
    repository: &'a dyn JobRepository,
    transaction_manager: Box<dyn TransactionManager + 'a>,
    step_operations: Box<dyn RepeatOperations + 'a>,
    streams: Vec<Box<dyn ItemStream + 'a>>,
    step_listeners: Vec<&'a dyn StepExecutionListener>,
    chunk_listeners: Vec<&'a dyn ChunkListener>,
    start_limit: usize,
    allow_start_if_complete: bool,
}

impl TaskletStep<'_> {
    fn run(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        for listener in &self.step_listeners {
            listener.before_step(step_execution);
        }

        self.open(&step_execution.execution_context)?;
        self.update_streams(&mut step_execution.execution_context)?;
        self.repository.update_step_execution_context(step_execution)?;

        let synchronizer = Mutex::new(&mut *step_execution);
        self.step_operations
            .iterate(&|context| self.do_in_transaction(&synchronizer, context))?;
        drop(synchronizer);

        if step_execution.is_terminate_only() {
            return Err(BatchError::JobInterrupted(format!("step {} interrupted", self.name)));
        }
        Ok(())
    }

    fn do_in_transaction(
        &self,
        synchronizer: &Mutex<&mut StepExecution>,
        context: &RepeatContext<'_>,
    ) -> Result<RepeatStatus, BatchError> {
        let mut contribution = {
            let step_execution = synchronizer.lock();
            self.check_interrupted(&step_execution)?;
            step_execution.create_step_contribution()
        };

        for listener in &self.chunk_listeners {
            listener.before_chunk();
        }

        let transaction = self.transaction_manager.begin()?;
        let result = match self.tasklet.execute(&mut contribution, context) {
            Ok(status) => {
                let mut step_execution = synchronizer.lock();
                self.commit(&mut step_execution, &contribution, transaction)
                    .map(|()| status)
            }
            Err(error) => {
                let mut step_execution = synchronizer.lock();
                let error = self.rollback(&mut step_execution, transaction, error);
                // Skips that counted toward the limit stay visible on a step
                // that fails.
                if !matches!(error, BatchError::ChunkRetry(_)) {
                    step_execution.apply_skips(&contribution);
                }
                Err(error)
            }
        };

        match &result {
            Ok(_) => self.chunk_listeners.iter().for_each(|listener| listener.after_chunk()),
            Err(error) => self
                .chunk_listeners
                .iter()
                .for_each(|listener| listener.after_chunk_error(error)),
        }

        let status = result?;
        self.check_interrupted(&synchronizer.lock())?;
        Ok(status)
    }

    fn commit(
        &self,
        step_execution: &mut StepExecution,
        contribution: &StepContribution,
        transaction: Transaction,
    ) -> Result<(), BatchError> {
        // Changes are made on a copy that replaces the execution once saved.
        let mut updated = step_execution.clone();

        // Positions are saved only once the chunk is fully written.
        if !contribution.is_chunk_pending() {
            if let Err(error) = self.update_streams(&mut updated.execution_context) {
                return Err(self.rollback(step_execution, transaction, error));
            }
        }

        debug!("Applying contribution: {:?}", contribution);
        updated.apply(contribution);
        updated.commit_count += 1;

        let saved = self
            .repository
            .update_step_execution_context(&updated)
            .and_then(|()| self.repository.update_step_execution(&mut updated));
        if let Err(error) = saved {
            error!("JobRepository failure forcing rollback: {}", error);
            if let Err(rollback_error) = self.transaction_manager.rollback(transaction) {
                error!("Rollback failed as well: {}", rollback_error);
            }
            return Err(BatchError::Fatal(format!("JobRepository failure forcing rollback: {error}")));
        }
        *step_execution = updated;

        self.transaction_manager.commit(transaction).map_err(|error| {
            error!("Commit failed after the step execution was saved: {}", error);
            BatchError::Fatal(format!("commit failed: {error}"))
        })
    }

    fn rollback(&self, step_execution: &mut StepExecution, transaction: Transaction, error: BatchError) -> BatchError {
        if let Err(rollback_error) = self.transaction_manager.rollback(transaction) {
            error!("Rollback failed after {}: {}", error, rollback_error);
            return BatchError::Fatal(format!("rollback failed: {rollback_error}"));
        }

        step_execution.rollback_count += 1;
        match &error {
            BatchError::ChunkRetry(cause) => debug!("Rolled back chunk of step {}: {}", self.name, cause),
            other => warn!("Rolled back chunk of step {}: {}", self.name, other),
        }
        error
    }

    fn check_interrupted(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        if step_execution.is_terminate_only() {
            info!("Step {} interrupted at a chunk boundary", self.name);
            return Err(BatchError::JobInterrupted(format!("step {} interrupted", self.name)));
        }
        Ok(())
    }

    fn open(&self, execution_context: &ExecutionContext) -> Result<(), BatchError> {
        for stream in &self.streams {
            stream.open(execution_context)?;
        }
        self.tasklet.open(execution_context)
    }

    fn update_streams(&self, execution_context: &mut ExecutionContext) -> Result<(), BatchError> {
        for stream in &self.streams {
            stream.update(execution_context)?;
        }
        Ok(())
    }

    fn close(&self, step_execution: &mut StepExecution) {
        let closed = self
            .streams
            .iter()
            .map(|stream| stream.close())
            .chain(std::iter::once(self.tasklet.close()));
        for result in closed {
            if let Err(error) = result {
                error!("Failed to close step {}: {}", self.name, error);
                step_execution.add_failure_exception(error);
            }
        }
    }
}

impl Step for TaskletStep<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_limit(&self) -> usize {
        self.start_limit
    }

    fn is_allow_start_if_complete(&self) -> bool {
        self.allow_start_if_complete
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        info!("Executing step: [{}]", self.name);

        step_execution.start_time = Some(Utc::now());
        step_execution.status = BatchStatus::Started;
        self.repository.update_step_execution(step_execution)?;

        let mut exit_status = ExitStatus::executing();
        match self.run(step_execution) {
            Ok(()) => {
                exit_status = ExitStatus::completed().and(&step_execution.exit_status);
                step_execution.upgrade_status(BatchStatus::Completed);
                debug!("Step execution success: id={}", step_execution.id);
            }
            Err(error) => {
                step_execution.upgrade_status(batch_status_for(&error));
                exit_status = exit_status.and(&exit_status_for(&error));
                for listener in &self.step_listeners {
                    listener.on_error(step_execution, &error);
                }
                if step_execution.status == BatchStatus::Stopped {
                    info!("Step {} stopped: {}", self.name, error);
                } else {
                    error!("Encountered an error executing step {}: {}", self.name, error);
                }
                step_execution.add_failure_exception(error);
            }
        }

        exit_status = exit_status.and(&step_execution.exit_status);
        step_execution.exit_status = exit_status.clone();
        for listener in &self.step_listeners {
            if let Some(status) = listener.after_step(step_execution) {
                exit_status = exit_status.and(&status);
            }
        }

        if let Err(error) = self.repository.update_step_execution_context(step_execution) {
            error!("Unable to save the execution context of step {}: {}", self.name, error);
            step_execution.status = BatchStatus::Unknown;
            exit_status = exit_status.and(&ExitStatus::unknown());
            step_execution.add_failure_exception(error);
        }

        step_execution.end_time = Some(Utc::now());
        step_execution.exit_status = exit_status.clone();
        if let Err(error) = self.repository.update_step_execution(step_execution) {
            error!("Unable to save step execution {}: {}", step_execution.id, error);
            step_execution.status = BatchStatus::Unknown;
            step_execution.exit_status = exit_status.and(&ExitStatus::unknown());
            step_execution.add_failure_exception(error);
        }

        self.close(step_execution);

        info!("Step: [{}] executed with status {}", self.name, step_execution.status);
        debug!("{}", step_execution.summary());

        match step_execution.status {
            BatchStatus::Failed | BatchStatus::Unknown => Err(step_execution
                .failure_exceptions
                .last()
                .cloned()
                .unwrap_or_else(|| BatchError::Step(format!("step {} failed", self.name)))),
            _ => Ok(()),
        }
    }
}

fn batch_status_for(error: &BatchError) -> BatchStatus {
    match error {
        BatchError::Fatal(_) => BatchStatus::Unknown,
        BatchError::JobInterrupted(_) => BatchStatus::Stopped,
        _ => BatchStatus::Failed,
    }
}

fn exit_status_for(error: &BatchError) -> ExitStatus {
    match error {
        BatchError::JobInterrupted(_) => ExitStatus::stopped().add_exit_description(&error.to_string()),
        _ => ExitStatus::failed().add_exit_description(&error.to_string()),
    }
}

/// Lets the step loop go on after a chunk rolled back to be attempted again;
/// other errors go to the configured handler.
struct ChunkRetryExceptionHandler<'a> {
    delegate: Box<dyn ExceptionHandler + 'a>,
}

impl ExceptionHandler for ChunkRetryExceptionHandler<'_> {
    fn handle_exception(&self, context: &RepeatContext<'_>, error: BatchError) -> Result<(), BatchError> {
        match error {
            BatchError::ChunkRetry(cause) => {
                debug!("Chunk will be attempted again after: {}", cause);
                Ok(())
            }
            other => self.delegate.handle_exception(context, other),
        }
    }
}

/// Builds steps.
///
/// Settings common to every kind of step are made here; [`StepBuilder::chunk`]
/// then switches to a builder for chunk-oriented steps, while
/// [`StepBuilder::tasklet`] keeps building a step around a custom tasklet.
///
/// # Examples
///
/// ```
/// use resumable_batch::BatchError;
/// use resumable_batch::core::item::PassThroughItemProcessor;
/// use resumable_batch::core::step::{Step, StepBuilder};
/// use resumable_batch::item::list::{ListItemReader, ListItemWriter};
/// use resumable_batch::repository::InMemoryJobRepository;
///
/// let repository = InMemoryJobRepository::new();
/// let reader = ListItemReader::new(vec![1, 2, 3]);
/// let writer: ListItemWriter<i32> = ListItemWriter::new();
///
/// let step = StepBuilder::new("copy")
///     .repository(&repository)
///     .chunk(2)
///     .reader(&reader)
///     .processor(&PassThroughItemProcessor)
///     .writer(&writer)
///     .fault_tolerant()
///     .skip_limit(1)
///     .skip(|error| matches!(error, BatchError::ItemProcessor(_)))
///     .build()?;
///
/// assert_eq!(step.name(), "copy");
/// # Ok::<(), BatchError>(())
/// ```
pub struct StepBuilder<'a> {
    name: String,
    repository: Option<&'a dyn JobRepository>,
    transaction_manager: Option<&'a dyn TransactionManager>,
    tasklet: Option<&'a dyn Tasklet>,
    step_listeners: Vec<&'a dyn StepExecutionListener>,
    chunk_listeners: Vec<&'a dyn ChunkListener>,
    streams: Vec<&'a dyn ItemStream>,
    exception_handler: Option<Box<dyn ExceptionHandler + 'a>>,
    start_limit: usize,
    allow_start_if_complete: bool,
    throttle_limit: Option<usize>,
}

impl<'a> StepBuilder<'a> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            repository: None,
            transaction_manager: None,
            tasklet: None,
            step_listeners: Vec::new(),
            chunk_listeners: Vec::new(),
            streams: Vec::new(),
            exception_handler: None,
            start_limit: usize::MAX,
            allow_start_if_complete: false,
            throttle_limit: None,
        }
    }

    pub fn repository(mut self, repository: &'a dyn JobRepository) -> Self {
        self.repository = Some(repository);
        self
    }

    /// Defaults to a [`ResourcelessTransactionManager`].
    pub fn transaction_manager(mut self, transaction_manager: &'a dyn TransactionManager) -> Self {
        self.transaction_manager = Some(transaction_manager);
        self
    }

    pub fn tasklet(mut self, tasklet: &'a dyn Tasklet) -> Self {
        self.tasklet = Some(tasklet);
        self
    }

    pub fn listener(mut self, listener: &'a dyn StepExecutionListener) -> Self {
        self.step_listeners.push(listener);
        self
    }

    pub fn chunk_listener(mut self, listener: &'a dyn ChunkListener) -> Self {
        self.chunk_listeners.push(listener);
        self
    }

    /// Registers a stream opened, updated and closed along with the step.
    pub fn stream(mut self, stream: &'a dyn ItemStream) -> Self {
        self.streams.push(stream);
        self
    }

    /// Handles errors ending a transaction. By default any such error fails
    /// the step.
    pub fn exception_handler(mut self, handler: impl ExceptionHandler + 'a) -> Self {
        self.exception_handler = Some(Box::new(handler));
        self
    }

    pub fn start_limit(mut self, start_limit: usize) -> Self {
        self.start_limit = start_limit;
        self
    }

    pub fn allow_start_if_complete(mut self, allow_start_if_complete: bool) -> Self {
        self.allow_start_if_complete = allow_start_if_complete;
        self
    }

    /// Runs transactions on up to `throttle_limit` threads at once.
    pub fn throttle_limit(mut self, throttle_limit: usize) -> Self {
        self.throttle_limit = Some(throttle_limit);
        self
    }

    /// Switches to a chunk-oriented step committing every `commit_interval` items.
    pub fn chunk<I, O>(self, commit_interval: usize) -> SimpleStepBuilder<'a, I, O> {
        SimpleStepBuilder {
            step: self,
            commit_interval,
            reader: None,
            processor: None,
            writer: None,
            read_listeners: Vec::new(),
            process_listeners: Vec::new(),
            write_listeners: Vec::new(),
        }
    }

    /// Builds a step around the tasklet given to [`StepBuilder::tasklet`].
    pub fn build(self) -> Result<TaskletStep<'a>, BatchError> {
        let tasklet = self
            .tasklet
            .ok_or_else(|| BatchError::Configuration(format!("step {} has no tasklet", self.name)))?;
        self.build_step(Box::new(tasklet), Vec::new())
    }

    fn build_step(
        self,
        tasklet: Box<dyn Tasklet + 'a>,
        mut streams: Vec<Box<dyn ItemStream + 'a>>,
    ) -> Result<TaskletStep<'a>, BatchError> {
        let repository = self
            .repository
            .ok_or_else(|| BatchError::Configuration(format!("step {} has no job repository", self.name)))?;

        let handler = ChunkRetryExceptionHandler {
            delegate: match self.exception_handler {
                Some(handler) => handler,
                None => Box::new(DefaultExceptionHandler),
            },
        };
        let step_operations: Box<dyn RepeatOperations + 'a> = match self.throttle_limit {
            Some(throttle_limit) => Box::new(
                TaskExecutorRepeatTemplate::new()
                    .with_throttle_limit(throttle_limit)
                    .with_exception_handler(handler),
            ),
            None => Box::new(RepeatTemplate::new().with_exception_handler(handler)),
        };
        let transaction_manager: Box<dyn TransactionManager + 'a> = match self.transaction_manager {
            Some(transaction_manager) => Box::new(transaction_manager),
            None => Box::new(ResourcelessTransactionManager::new()),
        };

        streams.extend(
            self.streams
                .into_iter()
                .map(|stream| Box::new(stream) as Box<dyn ItemStream + 'a>),
        );

        Ok(TaskletStep {
            name: self.name,
            tasklet,
            repository,
            transaction_manager,
            step_operations,
            streams,
            step_listeners: self.step_listeners,
            chunk_listeners: self.chunk_listeners,
            start_limit: self.start_limit,
            allow_start_if_complete: self.allow_start_if_complete,
        })
    }
}

fn item_streams<'a, I: 'a, O: 'a>(
    reader: &'a dyn ItemReader<I>,
    writer: &'a dyn ItemWriter<O>,
) -> Vec<Box<dyn ItemStream + 'a>> {
    let reader: Box<dyn ItemStream + 'a> = Box::new(ReaderStream(reader));
    let writer: Box<dyn ItemStream + 'a> = Box::new(WriterStream(writer));
    vec![reader, writer]
}

/// Builds a chunk-oriented step: items are read one at a time, processed,
/// and written in chunks of the commit interval.
pub struct SimpleStepBuilder<'a, I, O> {
    step: StepBuilder<'a>,
    commit_interval: usize,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    read_listeners: Vec<&'a dyn ItemReadListener<I>>,
    process_listeners: Vec<&'a dyn ItemProcessListener<I, O>>,
    write_listeners: Vec<&'a dyn ItemWriteListener<O>>,
}

type Collaborators<'a, I, O> = (
    &'a dyn ItemReader<I>,
    &'a dyn ItemProcessor<I, O>,
    &'a dyn ItemWriter<O>,
);

impl<'a, I: Send + 'a, O: Send + 'a> SimpleStepBuilder<'a, I, O> {
    pub fn reader(mut self, reader: &'a impl ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a impl ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a impl ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn read_listener(mut self, listener: &'a dyn ItemReadListener<I>) -> Self {
        self.read_listeners.push(listener);
        self
    }

    pub fn process_listener(mut self, listener: &'a dyn ItemProcessListener<I, O>) -> Self {
        self.process_listeners.push(listener);
        self
    }

    pub fn write_listener(mut self, listener: &'a dyn ItemWriteListener<O>) -> Self {
        self.write_listeners.push(listener);
        self
    }

    /// Switches to a step that skips and retries failed items.
    pub fn fault_tolerant(self) -> FaultTolerantStepBuilder<'a, I, O> {
        FaultTolerantStepBuilder {
            simple: self,
            skip_limit: 0,
            skippable: ErrorClassifier::new(false),
            skip_policy: None,
            retry_limit: 0,
            retryable: ErrorClassifier::new(false),
            retry_policy: None,
            back_off_policy: None,
            retry_listeners: Vec::new(),
            retry_cache_capacity: MapRetryContextCache::DEFAULT_CAPACITY,
            rollback: ErrorClassifier::new(true),
            processor_transactional: false,
            skip_listeners: Vec::new(),
        }
    }

    pub fn build(self) -> Result<TaskletStep<'a>, BatchError> {
        let (reader, processor, writer) = self.collaborators()?;

        let mut provider = SimpleChunkProvider::new(reader, self.commit_interval);
        for listener in self.read_listeners {
            provider = provider.register_listener(listener);
        }
        let mut chunk_processor = SimpleChunkProcessor::new(processor, writer);
        for listener in self.process_listeners {
            chunk_processor = chunk_processor.register_process_listener(listener);
        }
        for listener in self.write_listeners {
            chunk_processor = chunk_processor.register_write_listener(listener);
        }

        let tasklet = ChunkOrientedTasklet::new(provider, chunk_processor);
        self.step
            .build_step(Box::new(tasklet), item_streams(reader, writer))
    }

    fn collaborators(&self) -> Result<Collaborators<'a, I, O>, BatchError> {
        let name = &self.step.name;
        if self.commit_interval == 0 {
            return Err(BatchError::Configuration(format!(
                "step {name} needs a positive commit interval"
            )));
        }
        let missing = |what: &str| BatchError::Configuration(format!("step {name} has no {what}"));
        Ok((
            self.reader.ok_or_else(|| missing("reader"))?,
            self.processor.ok_or_else(|| missing("processor"))?,
            self.writer.ok_or_else(|| missing("writer"))?,
        ))
    }
}

impl<'a, T: Clone + Send + 'a> SimpleStepBuilder<'a, T, T> {
    /// Writes the items as they were read.
    pub fn pass_through(mut self) -> Self {
        self.processor = Some(&PassThroughItemProcessor);
        self
    }
}

/// Builds a chunk-oriented step that tolerates failures.
///
/// Errors of the processor and the writer are retried, then skipped when
/// classified as skippable, up to the skip limit; read errors can only be
/// skipped. By default nothing is retried or skipped, and every processing
/// error rolls the chunk back.
pub struct FaultTolerantStepBuilder<'a, I, O> {
    simple: SimpleStepBuilder<'a, I, O>,
    skip_limit: usize,
    skippable: ErrorClassifier,
    skip_policy: Option<Arc<dyn SkipPolicy + 'a>>,
    retry_limit: usize,
    retryable: ErrorClassifier,
    retry_policy: Option<Box<dyn RetryPolicy + 'a>>,
    back_off_policy: Option<Box<dyn BackOffPolicy + 'a>>,
    retry_listeners: Vec<&'a dyn RetryListener>,
    retry_cache_capacity: usize,
    rollback: ErrorClassifier,
    processor_transactional: bool,
    skip_listeners: Vec<&'a dyn SkipListener<I, O>>,
}

impl<'a, I: Send + 'a, O: Send + 'a> FaultTolerantStepBuilder<'a, I, O> {
    /// Maximum number of skips over the whole step.
    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.skippable = self.skippable.with(predicate, true);
        self
    }

    pub fn no_skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.skippable = self.skippable.with(predicate, false);
        self
    }

    /// Replaces the limit and classification set by `skip_limit` and `skip`.
    pub fn skip_policy(mut self, skip_policy: impl SkipPolicy + 'a) -> Self {
        self.skip_policy = Some(Arc::new(skip_policy));
        self
    }

    /// Maximum number of attempts for a retryable error, the first included.
    pub fn retry_limit(mut self, retry_limit: usize) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.retryable = self.retryable.with(predicate, true);
        self
    }

    pub fn no_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.retryable = self.retryable.with(predicate, false);
        self
    }

    /// Replaces the limit and classification set by `retry_limit` and `retry`.
    pub fn retry_policy(mut self, retry_policy: impl RetryPolicy + 'a) -> Self {
        self.retry_policy = Some(Box::new(retry_policy));
        self
    }

    pub fn back_off_policy(mut self, back_off_policy: impl BackOffPolicy + 'a) -> Self {
        self.back_off_policy = Some(Box::new(back_off_policy));
        self
    }

    pub fn retry_listener(mut self, listener: &'a dyn RetryListener) -> Self {
        self.retry_listeners.push(listener);
        self
    }

    /// Maximum number of items and chunks with a retry in progress.
    pub fn retry_cache_capacity(mut self, capacity: usize) -> Self {
        self.retry_cache_capacity = capacity;
        self
    }

    /// Processing errors matching `predicate` are retried and skipped
    /// without rolling the chunk back.
    pub fn no_rollback<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BatchError) -> bool + Send + Sync + 'static,
    {
        self.rollback = self.rollback.with(predicate, false);
        self
    }

    /// When set, items are processed again after a rollback instead of
    /// reusing the results of the failed transaction.
    pub fn processor_transactional(mut self, processor_transactional: bool) -> Self {
        self.processor_transactional = processor_transactional;
        self
    }

    pub fn skip_listener(mut self, listener: &'a dyn SkipListener<I, O>) -> Self {
        self.skip_listeners.push(listener);
        self
    }

    pub fn build(self) -> Result<TaskletStep<'a>, BatchError> {
        let simple = self.simple;
        let (reader, processor, writer) = simple.collaborators()?;

        let skip_policy: Arc<dyn SkipPolicy + 'a> = match self.skip_policy {
            Some(skip_policy) => skip_policy,
            None => Arc::new(LimitCheckingItemSkipPolicy::new(self.skip_limit, self.skippable)),
        };
        let retry_policy: Box<dyn RetryPolicy + 'a> = match self.retry_policy {
            Some(retry_policy) => retry_policy,
            None => Box::new(SimpleRetryPolicy::with_classifier(
                self.retry_limit.max(1),
                self.retryable,
            )),
        };

        let mut retry_template = RetryTemplate::new()
            .with_retry_policy(retry_policy)
            .with_retry_context_cache(MapRetryContextCache::new(self.retry_cache_capacity));
        if let Some(back_off_policy) = self.back_off_policy {
            retry_template = retry_template.with_back_off_policy(back_off_policy);
        }
        for listener in self.retry_listeners {
            retry_template = retry_template.register_listener(listener);
        }

        let mut provider = SimpleChunkProvider::new(reader, simple.commit_interval);
        for listener in simple.read_listeners {
            provider = provider.register_listener(listener);
        }
        let provider = FaultTolerantChunkProvider::new(provider, Arc::clone(&skip_policy));

        let mut chunk_processor = FaultTolerantChunkProcessor::new(processor, writer, skip_policy, retry_template)
            .with_rollback_classifier(self.rollback)
            .with_processor_transactional(self.processor_transactional);
        for listener in simple.process_listeners {
            chunk_processor = chunk_processor.register_process_listener(listener);
        }
        for listener in simple.write_listeners {
            chunk_processor = chunk_processor.register_write_listener(listener);
        }
        for listener in self.skip_listeners {
            chunk_processor = chunk_processor.register_skip_listener(listener);
        }

        let tasklet = ChunkOrientedTasklet::new(provider, chunk_processor);
        simple
            .step
            .build_step(Box::new(tasklet), item_streams(reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use uuid::Uuid;

    use crate::{
        core::{
            execution::{JobExecution, JobInstance},
            item::ItemWriterResult,
            job::Job,
            parameters::JobParameters,
        },
        item::list::{ListItemReader, ListItemWriter},
        repository::InMemoryJobRepository,
    };

    use super::*;

    fn job_execution() -> JobExecution {
        let parameters = JobParameters::new();
        JobExecution::new(JobInstance::new("job", &parameters), parameters)
    }

    fn saved_step_execution(repository: &InMemoryJobRepository, name: &str) -> StepExecution {
        let mut step_execution = StepExecution::new(name, &job_execution());
        repository.add_step_execution(&mut step_execution).unwrap();
        step_execution
    }

    /// Delegates to an in-memory repository but refuses the n-th save of a
    /// step execution.
    struct RefusingRepository {
        inner: InMemoryJobRepository,
        refused_save: usize,
        saves: AtomicUsize,
    }

    impl JobRepository for RefusingRepository {
        fn create_job_execution(
            &self,
            job: &dyn Job,
            job_parameters: &JobParameters,
        ) -> Result<JobExecution, BatchError> {
            self.inner.create_job_execution(job, job_parameters)
        }

        fn is_job_instance_exists(&self, job_name: &str, job_parameters: &JobParameters) -> bool {
            self.inner.is_job_instance_exists(job_name, job_parameters)
        }

        fn get_job_instance(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobInstance> {
            self.inner.get_job_instance(job_name, job_parameters)
        }

        fn get_job_execution(&self, id: Uuid) -> Option<JobExecution> {
            self.inner.get_job_execution(id)
        }

        fn get_last_job_execution(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobExecution> {
            self.inner.get_last_job_execution(job_name, job_parameters)
        }

        fn find_running_job_executions(&self, job_name: &str) -> Vec<JobExecution> {
            self.inner.find_running_job_executions(job_name)
        }

        fn update_job_execution(&self, job_execution: &mut JobExecution) -> Result<(), BatchError> {
            self.inner.update_job_execution(job_execution)
        }

        fn update_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
            self.inner.update_job_execution_context(job_execution)
        }

        fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
            self.inner.add_step_execution(step_execution)
        }

        fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
            if self.saves.fetch_add(1, Ordering::SeqCst) + 1 == self.refused_save {
                return Err(BatchError::OptimisticLockingFailure("disk full".to_string()));
            }
            self.inner.update_step_execution(step_execution)
        }

        fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
            self.inner.update_step_execution_context(step_execution)
        }

        fn get_last_step_execution(&self, job_instance: &JobInstance, step_name: &str) -> Option<StepExecution> {
            self.inner.get_last_step_execution(job_instance, step_name)
        }

        fn get_step_execution_count(&self, job_instance: &JobInstance, step_name: &str) -> usize {
            self.inner.get_step_execution_count(job_instance, step_name)
        }
    }

    struct Offline;

    impl ItemWriter<i32> for Offline {
        fn write(&self, _items: &[i32]) -> ItemWriterResult {
            Err(BatchError::ItemWriter("offline".to_string()))
        }
    }

    #[test]
    fn chunk_step_commits_every_interval() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2, 3, 4, 5]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let step = StepBuilder::new("copy")
            .repository(&repository)
            .chunk(2)
            .reader(&reader)
            .pass_through()
            .writer(&writer)
            .build()?;

        let mut step_execution = saved_step_execution(&repository, "copy");
        step.execute(&mut step_execution)?;

        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.exit_status.exit_code(), ExitStatus::COMPLETED_CODE);
        assert_eq!(step_execution.read_count, 5);
        assert_eq!(step_execution.write_count, 5);
        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(step_execution.rollback_count, 0);
        assert!(step_execution.start_time.is_some() && step_execution.end_time.is_some());
        assert_eq!(writer.items(), vec![1, 2, 3, 4, 5]);
        Ok(())
    }

    #[test]
    fn missing_collaborators_are_reported() {
        let reader = ListItemReader::new(vec![1]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let without_repository = StepBuilder::new("copy")
            .chunk(1)
            .reader(&reader)
            .pass_through()
            .writer(&writer)
            .build();
        assert!(matches!(without_repository, Err(BatchError::Configuration(_))));

        let repository = InMemoryJobRepository::new();
        let without_writer = StepBuilder::new("copy")
            .repository(&repository)
            .chunk::<i32, i32>(1)
            .reader(&reader)
            .pass_through()
            .build();
        assert!(matches!(without_writer, Err(BatchError::Configuration(_))));

        assert!(matches!(
            StepBuilder::new("noop").repository(&repository).build(),
            Err(BatchError::Configuration(_))
        ));
    }

    #[test]
    fn failed_save_leaves_no_commit_behind() {
        let repository = RefusingRepository {
            inner: InMemoryJobRepository::new(),
            // The first save marks the step started, the second one is the
            // first chunk commit.
            refused_save: 2,
            saves: AtomicUsize::new(0),
        };
        let reader = ListItemReader::new(vec![1, 2, 3]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let step = StepBuilder::new("copy")
            .repository(&repository)
            .chunk(2)
            .reader(&reader)
            .pass_through()
            .writer(&writer)
            .build()
            .unwrap();

        let mut step_execution = StepExecution::new("copy", &job_execution());
        repository.add_step_execution(&mut step_execution).unwrap();
        let result = step.execute(&mut step_execution);

        assert!(matches!(result, Err(BatchError::Fatal(_))));
        assert_eq!(step_execution.status, BatchStatus::Unknown);
        assert_eq!(step_execution.commit_count, 0);
        assert_eq!(step_execution.read_count, 0);
        assert_eq!(step_execution.write_count, 0);

        let saved = repository
            .get_last_step_execution(&step_execution.job_instance, "copy")
            .unwrap();
        assert_eq!(saved.status, BatchStatus::Unknown);
        assert_eq!(saved.commit_count, 0);
    }

    #[test]
    fn writer_failure_fails_the_step() {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2, 3]);
        let step = StepBuilder::new("copy")
            .repository(&repository)
            .chunk(2)
            .reader(&reader)
            .pass_through()
            .writer(&Offline)
            .build()
            .unwrap();

        let mut step_execution = saved_step_execution(&repository, "copy");
        let result = step.execute(&mut step_execution);

        assert_eq!(result, Err(BatchError::ItemWriter("offline".to_string())));
        assert_eq!(step_execution.status, BatchStatus::Failed);
        assert_eq!(step_execution.exit_status.exit_code(), ExitStatus::FAILED_CODE);
        assert!(step_execution.exit_status.exit_description().contains("offline"));
        assert_eq!(step_execution.rollback_count, 1);
        assert_eq!(step_execution.commit_count, 0);
        assert_eq!(step_execution.read_count, 0);
    }

    #[test]
    fn terminate_request_stops_before_the_next_chunk() {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2, 3]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let step = StepBuilder::new("copy")
            .repository(&repository)
            .chunk(2)
            .reader(&reader)
            .pass_through()
            .writer(&writer)
            .build()
            .unwrap();

        let mut step_execution = saved_step_execution(&repository, "copy");
        step_execution.set_terminate_only();

        assert!(step.execute(&mut step_execution).is_ok());
        assert_eq!(step_execution.status, BatchStatus::Stopped);
        assert_eq!(step_execution.exit_status.exit_code(), ExitStatus::STOPPED_CODE);
        assert!(writer.items().is_empty());
    }

    #[test]
    fn tasklet_runs_until_finished() -> Result<(), BatchError> {
        struct Countdown(AtomicUsize);

        impl Tasklet for Countdown {
            fn execute(
                &self,
                contribution: &mut StepContribution,
                _context: &RepeatContext<'_>,
            ) -> Result<RepeatStatus, BatchError> {
                contribution.increment_write_count(1);
                let left = self.0.fetch_sub(1, Ordering::SeqCst) - 1;
                Ok(RepeatStatus::continue_if(left > 0))
            }
        }

        struct Tagging;

        impl StepExecutionListener for Tagging {
            fn after_step(&self, _step_execution: &StepExecution) -> Option<ExitStatus> {
                Some(ExitStatus::new("TAGGED"))
            }
        }

        let repository = InMemoryJobRepository::new();
        let tasklet = Countdown(AtomicUsize::new(3));
        let step = StepBuilder::new("countdown")
            .repository(&repository)
            .tasklet(&tasklet)
            .listener(&Tagging)
            .build()?;

        let mut step_execution = saved_step_execution(&repository, "countdown");
        step.execute(&mut step_execution)?;

        assert_eq!(step_execution.commit_count, 3);
        assert_eq!(step_execution.write_count, 3);
        assert_eq!(step_execution.status, BatchStatus::Completed);
        assert_eq!(step_execution.exit_status.exit_code(), "TAGGED");
        Ok(())
    }

    #[test]
    fn processing_errors_are_skipped_after_a_rollback() -> Result<(), BatchError> {
        struct RejectOdd;

        impl ItemProcessor<i32, i32> for RejectOdd {
            fn process(&self, item: &i32) -> crate::core::item::ItemProcessorResult<i32> {
                if item % 2 == 1 {
                    Err(BatchError::ItemProcessor(format!("odd {item}")))
                } else {
                    Ok(Some(*item))
                }
            }
        }

        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2, 3, 4]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let step = StepBuilder::new("even")
            .repository(&repository)
            .chunk(2)
            .reader(&reader)
            .processor(&RejectOdd)
            .writer(&writer)
            .fault_tolerant()
            .skip_limit(2)
            .skip(|error| matches!(error, BatchError::ItemProcessor(_)))
            .build()?;

        let mut step_execution = saved_step_execution(&repository, "even");
        step.execute(&mut step_execution)?;

        assert_eq!(writer.items(), vec![2, 4]);
        assert_eq!(step_execution.process_skip_count, 2);
        assert_eq!(step_execution.rollback_count, 2);
        assert_eq!(step_execution.read_count, 4);
        assert_eq!(step_execution.write_count, 2);
        Ok(())
    }
}
