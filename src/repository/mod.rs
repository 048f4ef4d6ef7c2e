//! # Job repository
//!
//! Persists the metadata of job instances, job executions and step
//! executions, so that a failed or stopped job can be restarted where it
//! left off. Every read returns a copy: callers never share state with the
//! store except through the stop signal of a running execution.
//!
//! [`InMemoryJobRepository`] keeps everything in memory and is suited to
//! tests and to jobs that do not need to survive the process.

use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        execution::{JobExecution, JobInstance, StepExecution},
        job::Job,
        parameters::JobParameters,
    },
};

pub mod memory;

pub use memory::InMemoryJobRepository;

pub trait JobRepository: Send + Sync {
    /// Creates a new execution of the instance identified by the job name
    /// and the identifying parameters, creating the instance if needed.
    ///
    /// On a restart the job execution context of the last execution is
    /// carried over.
    ///
    /// # Errors
    /// - `JobExecutionAlreadyRunning` if an execution of the instance is still running
    /// - `JobInstanceAlreadyComplete` if an execution completed or was abandoned
    /// - `JobRestart` if the job is not restartable, or the last execution is `UNKNOWN`
    fn create_job_execution(&self, job: &dyn Job, job_parameters: &JobParameters)
    -> Result<JobExecution, BatchError>;

    fn is_job_instance_exists(&self, job_name: &str, job_parameters: &JobParameters) -> bool;

    fn get_job_instance(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobInstance>;

    fn get_job_execution(&self, id: Uuid) -> Option<JobExecution>;

    fn get_last_job_execution(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobExecution>;

    /// Executions of `job_name` that have not finished yet.
    fn find_running_job_executions(&self, job_name: &str) -> Vec<JobExecution>;

    /// Saves the execution and bumps its version.
    ///
    /// When the stored copy was changed behind the caller's back, typically
    /// by a stop request, its status is merged into `job_execution` first.
    fn update_job_execution(&self, job_execution: &mut JobExecution) -> Result<(), BatchError>;

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError>;

    /// Saves a new step execution and gives it its first version.
    fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;

    /// Saves the step execution and bumps its version.
    ///
    /// # Errors
    /// Returns `OptimisticLockingFailure` if the stored version differs from
    /// the caller's.
    fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError>;

    /// Latest execution of the named step across every execution of the
    /// instance.
    fn get_last_step_execution(&self, job_instance: &JobInstance, step_name: &str) -> Option<StepExecution>;

    /// Number of times the named step was started for the instance.
    fn get_step_execution_count(&self, job_instance: &JobInstance, step_name: &str) -> usize;
}
