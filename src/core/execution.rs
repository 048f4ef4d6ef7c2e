use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    execution_context::ExecutionContext,
    parameters::JobParameters,
    status::{BatchStatus, ExitStatus},
};

/// A logical job run, identified by the job name and the identifying
/// parameters it was launched with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: Uuid,
    pub job_name: String,
    /// Identifying key of the parameters this instance was created for
    pub job_key: String,
}

impl JobInstance {
    pub fn new(job_name: &str, job_parameters: &JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.to_string(),
            job_key: job_parameters.identifying_key(),
        }
    }
}

/// One attempt to run a [`JobInstance`].
///
/// The stop signal is shared by every copy of the execution and by the step
/// executions created from it, so that a stop request made through the
/// repository reaches the thread running the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExecution {
    pub id: Uuid,
    pub job_instance: JobInstance,
    pub job_parameters: JobParameters,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    pub step_executions: Vec<StepExecution>,
    /// Optimistic locking version, `None` until the execution is first saved
    pub version: Option<u32>,
    #[serde(skip)]
    pub failure_exceptions: Vec<BatchError>,
    #[serde(skip)]
    stop_signal: Arc<AtomicBool>,
}

impl JobExecution {
    pub fn new(job_instance: JobInstance, job_parameters: JobParameters) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_instance,
            job_parameters,
            status: BatchStatus::Starting,
            exit_status: ExitStatus::unknown(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            step_executions: Vec::new(),
            version: None,
            failure_exceptions: Vec::new(),
            stop_signal: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_instance.job_name
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_stopping(&self) -> bool {
        self.status == BatchStatus::Stopping
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Requests a cooperative stop: the status becomes `STOPPING` and every
    /// step of this execution sees its terminate-only flag raised.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if self.status.is_running() {
            self.status = BatchStatus::Stopping;
        }
        for step_execution in &mut self.step_executions {
            step_execution.set_terminate_only();
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_signal.load(Ordering::SeqCst)
    }

    pub fn add_failure_exception(&mut self, error: BatchError) {
        self.failure_exceptions.push(error);
    }

    /// Failures of the job itself followed by those of its steps.
    pub fn all_failure_exceptions(&self) -> Vec<BatchError> {
        let mut all = self.failure_exceptions.clone();
        for step_execution in &self.step_executions {
            for error in &step_execution.failure_exceptions {
                if !all.contains(error) {
                    all.push(error.clone());
                }
            }
        }
        all
    }

    pub fn step_execution(&self, step_name: &str) -> Option<&StepExecution> {
        self.step_executions
            .iter()
            .rev()
            .find(|step_execution| step_execution.step_name == step_name)
    }

    pub(crate) fn stop_signal(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop_signal)
    }
}

/// Equality is decided by identity and version, not by content.
impl PartialEq for JobExecution {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

/// One attempt to run a named step within a [`JobExecution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: Uuid,
    pub step_name: String,
    pub job_execution_id: Uuid,
    /// Instance of the owning job execution, used to look up step history
    pub job_instance: JobInstance,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub write_skip_count: usize,
    pub process_skip_count: usize,
    pub commit_count: usize,
    pub rollback_count: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub execution_context: ExecutionContext,
    pub version: Option<u32>,
    #[serde(skip)]
    pub failure_exceptions: Vec<BatchError>,
    #[serde(skip)]
    terminate_only: Arc<AtomicBool>,
}

impl StepExecution {
    pub fn new(step_name: &str, job_execution: &JobExecution) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_name: step_name.to_string(),
            job_execution_id: job_execution.id,
            job_instance: job_execution.job_instance.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::executing(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            read_skip_count: 0,
            write_skip_count: 0,
            process_skip_count: 0,
            commit_count: 0,
            rollback_count: 0,
            start_time: None,
            end_time: None,
            last_updated: None,
            execution_context: ExecutionContext::new(),
            version: None,
            failure_exceptions: Vec::new(),
            terminate_only: job_execution.stop_signal(),
        }
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.write_skip_count + self.process_skip_count
    }

    pub fn upgrade_status(&mut self, status: BatchStatus) {
        self.status = self.status.upgrade_to(status);
    }

    /// Marks the execution to stop at the next chunk boundary.
    pub fn set_terminate_only(&self) {
        self.terminate_only.store(true, Ordering::SeqCst);
    }

    pub fn is_terminate_only(&self) -> bool {
        self.terminate_only.load(Ordering::SeqCst)
    }

    pub fn add_failure_exception(&mut self, error: BatchError) {
        self.failure_exceptions.push(error);
    }

    /// Creates an empty contribution for one chunk transaction.
    pub fn create_step_contribution(&self) -> StepContribution {
        StepContribution {
            parent_skip_count: self.skip_count(),
            ..StepContribution::default()
        }
    }

    /// Adds the counts of a committed chunk.
    pub fn apply(&mut self, contribution: &StepContribution) {
        self.read_count += contribution.read_count;
        self.write_count += contribution.write_count;
        self.filter_count += contribution.filter_count;
        self.read_skip_count += contribution.read_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.process_skip_count += contribution.process_skip_count;
        self.exit_status = self.exit_status.and(&contribution.exit_status);
    }

    /// Adds only the skip counts of a chunk that failed the step.
    pub fn apply_skips(&mut self, contribution: &StepContribution) {
        self.read_skip_count += contribution.read_skip_count;
        self.write_skip_count += contribution.write_skip_count;
        self.process_skip_count += contribution.process_skip_count;
    }

    pub fn summary(&self) -> String {
        format!(
            "StepExecution: name={}, status={}, exitStatus={}, readCount={}, filterCount={}, writeCount={}, readSkipCount={}, writeSkipCount={}, processSkipCount={}, commitCount={}, rollbackCount={}",
            self.step_name,
            self.status,
            self.exit_status.exit_code(),
            self.read_count,
            self.filter_count,
            self.write_count,
            self.read_skip_count,
            self.write_skip_count,
            self.process_skip_count,
            self.commit_count,
            self.rollback_count
        )
    }
}

impl PartialEq for StepExecution {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.version == other.version
    }
}

/// Counts accumulated by one chunk transaction.
///
/// A contribution is applied to its [`StepExecution`] only when the chunk
/// commits; a rolled back chunk simply drops it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepContribution {
    pub read_count: usize,
    pub write_count: usize,
    pub filter_count: usize,
    pub read_skip_count: usize,
    pub write_skip_count: usize,
    pub process_skip_count: usize,
    /// Skips already committed by the step before this chunk
    pub parent_skip_count: usize,
    pub exit_status: ExitStatus,
    chunk_pending: bool,
}

impl StepContribution {
    pub fn increment_read_count(&mut self, count: usize) {
        self.read_count += count;
    }

    pub fn increment_write_count(&mut self, count: usize) {
        self.write_count += count;
    }

    pub fn increment_filter_count(&mut self, count: usize) {
        self.filter_count += count;
    }

    pub fn increment_read_skip_count(&mut self) {
        self.read_skip_count += 1;
    }

    pub fn increment_write_skip_count(&mut self) {
        self.write_skip_count += 1;
    }

    pub fn increment_process_skip_count(&mut self) {
        self.process_skip_count += 1;
    }

    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.write_skip_count + self.process_skip_count
    }

    /// Skips of the whole step, committed ones included.
    pub fn step_skip_count(&self) -> usize {
        self.skip_count() + self.parent_skip_count
    }

    pub fn set_exit_status(&mut self, exit_status: ExitStatus) {
        self.exit_status = exit_status;
    }

    /// Marks the chunk as not finished by this transaction. Stream positions
    /// are not saved until the chunk is complete.
    pub fn set_chunk_pending(&mut self, pending: bool) {
        self.chunk_pending = pending;
    }

    pub fn is_chunk_pending(&self) -> bool {
        self.chunk_pending
    }
}
