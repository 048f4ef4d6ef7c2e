use chrono::Utc;
use log::{debug, error, info};

use crate::{BatchError, repository::JobRepository};

use super::{
    build_name,
    execution::{JobExecution, StepExecution},
    execution_context::ExecutionContext,
    listener::JobExecutionListener,
    status::{BatchStatus, ExitStatus},
    step::Step,
};

/// Type alias for job execution results.
type JobResult<T> = Result<T, BatchError>;

/// Represents a job that can be executed.
///
/// A job is a sequence of steps run in order. It is executed within a
/// [`JobExecution`] created by the [`JobRepository`], usually through a
/// [`SimpleJobLauncher`](super::launch::SimpleJobLauncher).
///
/// # Example Usage
///
/// ```rust
/// use resumable_batch::BatchError;
/// use resumable_batch::core::job::{Job, JobBuilder};
/// use resumable_batch::core::item::PassThroughItemProcessor;
/// use resumable_batch::core::parameters::JobParameters;
/// use resumable_batch::core::status::BatchStatus;
/// use resumable_batch::core::step::StepBuilder;
/// use resumable_batch::item::list::{ListItemReader, ListItemWriter};
/// use resumable_batch::repository::{InMemoryJobRepository, JobRepository};
///
/// let repository = InMemoryJobRepository::new();
/// let reader = ListItemReader::new(vec!["a", "b", "c"]);
/// let writer: ListItemWriter<&str> = ListItemWriter::new();
///
/// let step = StepBuilder::new("copy")
///     .repository(&repository)
///     .chunk(2)
///     .reader(&reader)
///     .processor(&PassThroughItemProcessor)
///     .writer(&writer)
///     .build()?;
///
/// let job = JobBuilder::new()
///     .name("copy-job".to_string())
///     .repository(&repository)
///     .start(&step)
///     .build()?;
///
/// let mut execution = repository.create_job_execution(&job, &JobParameters::new())?;
/// job.execute(&mut execution)?;
///
/// assert_eq!(execution.status, BatchStatus::Completed);
/// assert_eq!(writer.items(), vec!["a", "b", "c"]);
/// # Ok::<(), BatchError>(())
/// ```
pub trait Job: Sync {
    fn name(&self) -> &str;

    /// Whether a failed or stopped instance of this job may be run again.
    fn is_restartable(&self) -> bool {
        true
    }

    /// Runs the job within an execution created by the repository.
    ///
    /// # Returns
    /// - `Ok(())` when the job completed or was stopped on request
    /// - `Err(BatchError)` with the cause when the job failed
    fn execute(&self, job_execution: &mut JobExecution) -> JobResult<()>;
}

/// A job running its steps one after the other.
///
/// The job stops at the first step that does not complete, taking that
/// step's status. On a restart, steps that already completed are skipped
/// unless they allow it, and a step that did not complete resumes with the
/// execution context it saved.
pub struct SimpleJob<'a> {
    name: String,
    steps: Vec<&'a dyn Step>,
    repository: &'a dyn JobRepository,
    listeners: Vec<&'a dyn JobExecutionListener>,
    restartable: bool,
}

impl SimpleJob<'_> {
    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().copied()
    }

    fn run(&self, job_execution: &mut JobExecution) -> JobResult<()> {
        if job_execution.is_stopping() {
            job_execution.status = BatchStatus::Stopped;
            job_execution.exit_status = ExitStatus::stopped().add_exit_description("stopped before it started");
            return Ok(());
        }

        job_execution.start_time = Some(Utc::now());
        job_execution.status = BatchStatus::Started;
        self.repository.update_job_execution(job_execution)?;

        for listener in &self.listeners {
            listener.before_job(job_execution);
        }

        let mut last: Option<StepExecution> = None;
        for step in &self.steps {
            let step_execution = self.handle_step(*step, job_execution)?;
            let completed = step_execution.status == BatchStatus::Completed;
            last = Some(step_execution);
            if !completed {
                break;
            }
        }

        match last {
            Some(last) => {
                job_execution.upgrade_status(last.status);
                job_execution.exit_status = last.exit_status;
            }
            None => {
                job_execution.upgrade_status(BatchStatus::Completed);
                job_execution.exit_status = ExitStatus::completed();
            }
        }
        Ok(())
    }

    /// Runs one step, or returns its last execution when it should not run
    /// again.
    fn handle_step(&self, step: &dyn Step, job_execution: &mut JobExecution) -> JobResult<StepExecution> {
        if job_execution.is_stopping() || job_execution.is_stop_requested() {
            return Err(BatchError::JobInterrupted(format!(
                "job execution {} interrupted before step {}",
                job_execution.id,
                step.name()
            )));
        }

        let last = self
            .repository
            .get_last_step_execution(&job_execution.job_instance, step.name())
            // Ran already within this execution: run it again.
            .filter(|last| last.job_execution_id != job_execution.id);

        if !self.should_start(last.as_ref(), job_execution, step)? {
            info!("Step already complete or not restartable, so no action to execute: {}", step.name());
            return last.ok_or_else(|| BatchError::Job(format!("no previous execution of step {}", step.name())));
        }

        let mut step_execution = StepExecution::new(step.name(), job_execution);
        step_execution.execution_context = match &last {
            Some(last) if last.status != BatchStatus::Completed => {
                debug!("Restarting step {} from its saved state", step.name());
                last.execution_context.clone()
            }
            _ => ExecutionContext::new(),
        };
        self.repository.add_step_execution(&mut step_execution)?;

        let outcome = step.execute(&mut step_execution);
        job_execution.step_executions.push(step_execution.clone());
        if let Err(error) = outcome {
            // A step that could not record its own failure fails the job.
            if !matches!(step_execution.status, BatchStatus::Failed | BatchStatus::Unknown) {
                return Err(error);
            }
            debug!("Step {} failed: {}", step.name(), error);
        }

        self.repository.update_job_execution_context(job_execution)?;

        if matches!(step_execution.status, BatchStatus::Stopping | BatchStatus::Stopped) {
            job_execution.status = BatchStatus::Stopping;
            return Err(BatchError::JobInterrupted("job interrupted by step execution".to_string()));
        }

        Ok(step_execution)
    }

    fn should_start(&self, last: Option<&StepExecution>, job_execution: &JobExecution, step: &dyn Step) -> JobResult<bool> {
        let status = last.map_or(BatchStatus::Starting, |last| last.status);

        if status == BatchStatus::Unknown {
            return Err(BatchError::JobRestart(format!(
                "cannot restart step {} from UNKNOWN status, its state may be inconsistent",
                step.name()
            )));
        }

        if (status == BatchStatus::Completed && !step.is_allow_start_if_complete()) || status == BatchStatus::Abandoned {
            return Ok(false);
        }

        let started = self
            .repository
            .get_step_execution_count(&job_execution.job_instance, step.name());
        if started < step.start_limit() {
            Ok(true)
        } else {
            Err(BatchError::StartLimitExceeded {
                step: step.name().to_string(),
                limit: step.start_limit(),
            })
        }
    }
}

impl Job for SimpleJob<'_> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_restartable(&self) -> bool {
        self.restartable
    }

    fn execute(&self, job_execution: &mut JobExecution) -> JobResult<()> {
        info!("Start of job: {}, id: {}", self.name, job_execution.id);

        if let Err(error) = self.run(job_execution) {
            match error {
                BatchError::JobInterrupted(_) => {
                    info!("Job {} interrupted: {}", self.name, error);
                    job_execution.exit_status = ExitStatus::stopped().add_exit_description(&error.to_string());
                    job_execution.status = job_execution.status.max(BatchStatus::Stopped);
                }
                _ => {
                    error!("Encountered fatal error executing job {}: {}", self.name, error);
                    job_execution.exit_status = ExitStatus::failed().add_exit_description(&error.to_string());
                    job_execution.status = BatchStatus::Failed;
                }
            }
            job_execution.add_failure_exception(error);
        }

        if job_execution.status == BatchStatus::Completed && job_execution.step_executions.is_empty() {
            let description = if self.steps.is_empty() {
                "No steps configured for this job"
            } else {
                "All steps already completed"
            };
            job_execution.exit_status = job_execution
                .exit_status
                .and(&ExitStatus::noop().add_exit_description(description));
        }

        job_execution.end_time = Some(Utc::now());
        for listener in &self.listeners {
            listener.after_job(job_execution);
        }
        self.repository.update_job_execution(job_execution)?;

        info!(
            "End of job: {}, id: {}, status: {}",
            self.name, job_execution.id, job_execution.status
        );

        match job_execution.status {
            BatchStatus::Failed | BatchStatus::Unknown => Err(job_execution
                .all_failure_exceptions()
                .pop()
                .unwrap_or_else(|| BatchError::Job(format!("job {} failed", self.name)))),
            _ => Ok(()),
        }
    }
}

/// Builds a [`SimpleJob`].
pub struct JobBuilder<'a> {
    name: Option<String>,
    steps: Vec<&'a dyn Step>,
    repository: Option<&'a dyn JobRepository>,
    listeners: Vec<&'a dyn JobExecutionListener>,
    restartable: bool,
}

impl<'a> JobBuilder<'a> {
    pub fn new() -> Self {
        Self {
            name: None,
            steps: Vec::new(),
            repository: None,
            listeners: Vec::new(),
            restartable: true,
        }
    }

    /// Sets the job name. A random name is used when none is given.
    pub fn name(mut self, name: String) -> JobBuilder<'a> {
        self.name = Some(name);
        self
    }

    /// Sets the first step of the job.
    pub fn start(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.insert(0, step);
        self
    }

    /// Adds a step after the ones already added.
    pub fn next(mut self, step: &'a dyn Step) -> JobBuilder<'a> {
        self.steps.push(step);
        self
    }

    pub fn repository(mut self, repository: &'a dyn JobRepository) -> JobBuilder<'a> {
        self.repository = Some(repository);
        self
    }

    pub fn listener(mut self, listener: &'a dyn JobExecutionListener) -> JobBuilder<'a> {
        self.listeners.push(listener);
        self
    }

    pub fn restartable(mut self, restartable: bool) -> JobBuilder<'a> {
        self.restartable = restartable;
        self
    }

    /// # Errors
    /// Returns `BatchError::Configuration` when no repository was given.
    pub fn build(self) -> JobResult<SimpleJob<'a>> {
        let name = self.name.unwrap_or_else(build_name);
        let repository = self
            .repository
            .ok_or_else(|| BatchError::Configuration(format!("job {name} has no job repository")))?;

        Ok(SimpleJob {
            name,
            steps: self.steps,
            repository,
            listeners: self.listeners,
            restartable: self.restartable,
        })
    }
}

impl Default for JobBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use crate::{
        core::{
            execution::StepContribution,
            parameters::JobParameters,
            step::{StepBuilder, TaskletStep},
            tasklet::Tasklet,
        },
        repeat::{RepeatContext, RepeatStatus},
        repository::InMemoryJobRepository,
    };

    use super::*;

    struct Recording<'r> {
        name: &'static str,
        log: &'r Mutex<Vec<&'static str>>,
        failures: AtomicUsize,
    }

    impl<'r> Recording<'r> {
        fn new(name: &'static str, log: &'r Mutex<Vec<&'static str>>, failures: usize) -> Self {
            Self {
                name,
                log,
                failures: AtomicUsize::new(failures),
            }
        }
    }

    impl Tasklet for Recording<'_> {
        fn execute(
            &self,
            _contribution: &mut StepContribution,
            _context: &RepeatContext<'_>,
        ) -> Result<RepeatStatus, BatchError> {
            self.log.lock().push(self.name);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                Err(BatchError::Tasklet(format!("{} failed", self.name)))
            } else {
                Ok(RepeatStatus::Finished)
            }
        }
    }

    fn step<'a>(repository: &'a InMemoryJobRepository, tasklet: &'a Recording<'_>) -> TaskletStep<'a> {
        StepBuilder::new(tasklet.name)
            .repository(repository)
            .tasklet(tasklet)
            .build()
            .unwrap()
    }

    #[test]
    fn steps_run_in_order() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let log = Mutex::new(Vec::new());
        let (first, second) = (Recording::new("first", &log, 0), Recording::new("second", &log, 0));
        let (first_step, second_step) = (step(&repository, &first), step(&repository, &second));
        let job = JobBuilder::new()
            .repository(&repository)
            .start(&first_step)
            .next(&second_step)
            .build()?;

        let mut execution = repository.create_job_execution(&job, &JobParameters::new())?;
        job.execute(&mut execution)?;

        assert_eq!(*log.lock(), vec!["first", "second"]);
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code(), ExitStatus::COMPLETED_CODE);
        assert_eq!(execution.step_executions.len(), 2);
        assert_eq!(job.name().len(), 8);
        Ok(())
    }

    #[test]
    fn failed_step_ends_the_job_and_restart_skips_completed_steps() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let log = Mutex::new(Vec::new());
        let (first, second) = (Recording::new("first", &log, 0), Recording::new("second", &log, 1));
        let (first_step, second_step) = (step(&repository, &first), step(&repository, &second));
        let job = JobBuilder::new()
            .name("restartable".to_string())
            .repository(&repository)
            .start(&first_step)
            .next(&second_step)
            .build()?;

        let mut failed = repository.create_job_execution(&job, &JobParameters::new())?;
        assert!(job.execute(&mut failed).is_err());
        assert_eq!(failed.status, BatchStatus::Failed);
        assert_eq!(failed.exit_status.exit_code(), ExitStatus::FAILED_CODE);

        let mut restarted = repository.create_job_execution(&job, &JobParameters::new())?;
        job.execute(&mut restarted)?;

        assert_eq!(*log.lock(), vec!["first", "second", "second"]);
        assert_eq!(restarted.status, BatchStatus::Completed);
        assert_eq!(restarted.step_executions.len(), 1);
        Ok(())
    }

    #[test]
    fn start_limit_is_enforced() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let log = Mutex::new(Vec::new());
        let flaky = Recording::new("flaky", &log, 5);
        let limited = StepBuilder::new("flaky")
            .repository(&repository)
            .tasklet(&flaky)
            .start_limit(1)
            .build()?;
        let job = JobBuilder::new().repository(&repository).start(&limited).build()?;

        let mut first = repository.create_job_execution(&job, &JobParameters::new())?;
        assert!(job.execute(&mut first).is_err());

        let mut second = repository.create_job_execution(&job, &JobParameters::new())?;
        let result = job.execute(&mut second);

        assert!(matches!(result, Err(BatchError::StartLimitExceeded { limit: 1, .. })));
        assert_eq!(second.status, BatchStatus::Failed);
        assert_eq!(log.lock().len(), 1);
        Ok(())
    }

    #[test]
    fn empty_job_is_a_noop() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let job = JobBuilder::new().repository(&repository).build()?;

        let mut execution = repository.create_job_execution(&job, &JobParameters::new())?;
        job.execute(&mut execution)?;

        assert_eq!(execution.exit_status.exit_code(), ExitStatus::NOOP_CODE);
        assert!(execution.exit_status.exit_description().contains("No steps configured"));
        Ok(())
    }

    #[test]
    fn job_stopped_before_start_runs_no_step() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let log = Mutex::new(Vec::new());
        let only = Recording::new("only", &log, 0);
        let only_step = step(&repository, &only);
        let job = JobBuilder::new().repository(&repository).start(&only_step).build()?;

        let mut execution = repository.create_job_execution(&job, &JobParameters::new())?;
        execution.status = BatchStatus::Started;
        execution.stop();
        job.execute(&mut execution)?;

        assert!(log.lock().is_empty());
        assert_eq!(execution.status, BatchStatus::Stopped);
        Ok(())
    }

    #[test]
    fn job_without_repository_is_rejected() {
        assert!(matches!(JobBuilder::new().build(), Err(BatchError::Configuration(_))));
    }
}
