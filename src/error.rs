use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
/// Batch error
pub enum BatchError {
    #[error("ItemReader from: {0}")]
    ItemReader(String),

    #[error("ItemProcessor from: {0}")]
    ItemProcessor(String),

    #[error("ItemWriter from: {0}")]
    ItemWriter(String),

    #[error("Tasklet from: {0}")]
    Tasklet(String),

    #[error("Error in step: {0}")]
    Step(String),

    #[error("Error in job: {0}")]
    Job(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Execution context error: {0}")]
    ExecutionContext(String),

    #[error("Transaction failure: {0}")]
    Transaction(String),

    #[error("A job execution for this job is already running: {0}")]
    JobExecutionAlreadyRunning(String),

    #[error("A job instance already exists and is complete: {0}")]
    JobInstanceAlreadyComplete(String),

    #[error("Restart refused: {0}")]
    JobRestart(String),

    #[error("Maximum start limit exceeded for step: {step}, start limit: {limit}")]
    StartLimitExceeded { step: String, limit: usize },

    #[error("Job interrupted: {0}")]
    JobInterrupted(String),

    #[error("No job registered with name: {0}")]
    NoSuchJob(String),

    #[error("Optimistic locking failure: {0}")]
    OptimisticLockingFailure(String),

    #[error("Skip limit of {limit} exceeded, caused by: {source}")]
    SkipLimitExceeded { limit: usize, source: Box<BatchError> },

    #[error("Non-skippable error: {0}")]
    NonSkippable(Box<BatchError>),

    #[error("Retry exhausted with no recovery path: {0}")]
    RetryExhausted(Box<BatchError>),

    #[error("Retry terminated: {0}")]
    RetryTerminated(String),

    #[error("Retry context cache capacity of {0} exceeded")]
    RetryCacheCapacityExceeded(usize),

    #[error("Chunk rolled back for another attempt: {0}")]
    ChunkRetry(Box<BatchError>),

    #[error("Fatal error, execution state is unknown: {0}")]
    Fatal(String),
}

impl BatchError {
    /// Returns the error that caused this one when it only wraps another
    /// batch error, or `self` otherwise.
    ///
    /// # Examples
    ///
    /// ```
    /// use resumable_batch::BatchError;
    ///
    /// let cause = BatchError::ItemWriter("disk full".to_string());
    /// let wrapped = BatchError::ChunkRetry(Box::new(cause.clone()));
    /// assert_eq!(wrapped.root_cause(), &cause);
    /// ```
    pub fn root_cause(&self) -> &BatchError {
        match self {
            BatchError::SkipLimitExceeded { source, .. } => source.root_cause(),
            BatchError::NonSkippable(source)
            | BatchError::RetryExhausted(source)
            | BatchError::ChunkRetry(source) => source.root_cause(),
            other => other,
        }
    }
}
