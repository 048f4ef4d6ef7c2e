use chrono::Utc;
use log::{debug, info};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    BatchError,
    core::{
        execution::{JobExecution, JobInstance, StepExecution},
        execution_context::ExecutionContext,
        job::Job,
        parameters::JobParameters,
        status::BatchStatus,
    },
};

use super::JobRepository;

#[derive(Debug, Default)]
struct Store {
    instances: Vec<JobInstance>,
    job_executions: Vec<JobExecution>,
    step_executions: Vec<StepExecution>,
}

impl Store {
    fn find_instance(&self, job_name: &str, job_key: &str) -> Option<&JobInstance> {
        self.instances
            .iter()
            .find(|instance| instance.job_name == job_name && instance.job_key == job_key)
    }

    /// Executions of the instance, oldest first.
    fn executions_of(&self, job_instance: &JobInstance) -> impl Iterator<Item = &JobExecution> {
        self.job_executions
            .iter()
            .filter(move |execution| execution.job_instance.id == job_instance.id)
    }
}

/// [`JobRepository`] keeping its data in memory, behind a single lock.
///
/// # Examples
///
/// ```
/// use resumable_batch::repository::{InMemoryJobRepository, JobRepository};
/// use resumable_batch::core::parameters::JobParameters;
///
/// let repository = InMemoryJobRepository::new();
/// assert!(!repository.is_job_instance_exists("import", &JobParameters::new()));
/// ```
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    store: Mutex<Store>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Step executions saved for a job execution, in the order they were added.
    pub fn step_executions(&self, job_execution_id: Uuid) -> Vec<StepExecution> {
        self.store
            .lock()
            .step_executions
            .iter()
            .filter(|step_execution| step_execution.job_execution_id == job_execution_id)
            .cloned()
            .collect()
    }
}

impl JobRepository for InMemoryJobRepository {
    fn create_job_execution(
        &self,
        job: &dyn Job,
        job_parameters: &JobParameters,
    ) -> Result<JobExecution, BatchError> {
        let mut store = self.store.lock();
        let job_key = job_parameters.identifying_key();

        let existing = store.find_instance(job.name(), &job_key).cloned();
        let (job_instance, execution_context) = match existing {
            Some(job_instance) => {
                if !job.is_restartable() {
                    return Err(BatchError::JobRestart(format!(
                        "job instance of {} already exists and the job is not restartable",
                        job.name()
                    )));
                }

                let mut last: Option<&JobExecution> = None;
                for execution in store.executions_of(&job_instance) {
                    if execution.is_running() {
                        return Err(BatchError::JobExecutionAlreadyRunning(format!(
                            "{} ({})",
                            job.name(),
                            execution.id
                        )));
                    }
                    if matches!(execution.status, BatchStatus::Completed | BatchStatus::Abandoned) {
                        return Err(BatchError::JobInstanceAlreadyComplete(format!(
                            "{} with parameters [{}]",
                            job.name(),
                            job_key
                        )));
                    }
                    last = Some(execution);
                }

                let context = match last {
                    Some(last) if last.status == BatchStatus::Unknown => {
                        return Err(BatchError::JobRestart(format!(
                            "last execution of {} ended with status UNKNOWN",
                            job.name()
                        )));
                    }
                    Some(last) => last.execution_context.clone(),
                    None => ExecutionContext::new(),
                };
                debug!("Restarting job instance {} of {}", job_instance.id, job.name());
                (job_instance, context)
            }
            None => {
                let job_instance = JobInstance::new(job.name(), job_parameters);
                store.instances.push(job_instance.clone());
                (job_instance, ExecutionContext::new())
            }
        };

        let mut job_execution = JobExecution::new(job_instance, job_parameters.clone());
        job_execution.execution_context = execution_context;
        job_execution.last_updated = Some(Utc::now());
        job_execution.version = Some(0);
        store.job_executions.push(job_execution.clone());

        Ok(job_execution)
    }

    fn is_job_instance_exists(&self, job_name: &str, job_parameters: &JobParameters) -> bool {
        self.get_job_instance(job_name, job_parameters).is_some()
    }

    fn get_job_instance(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobInstance> {
        self.store
            .lock()
            .find_instance(job_name, &job_parameters.identifying_key())
            .cloned()
    }

    fn get_job_execution(&self, id: Uuid) -> Option<JobExecution> {
        self.store
            .lock()
            .job_executions
            .iter()
            .find(|execution| execution.id == id)
            .cloned()
    }

    fn get_last_job_execution(&self, job_name: &str, job_parameters: &JobParameters) -> Option<JobExecution> {
        let store = self.store.lock();
        let job_instance = store.find_instance(job_name, &job_parameters.identifying_key())?;
        store.executions_of(job_instance).last().cloned()
    }

    fn find_running_job_executions(&self, job_name: &str) -> Vec<JobExecution> {
        self.store
            .lock()
            .job_executions
            .iter()
            .filter(|execution| execution.job_name() == job_name && execution.is_running())
            .cloned()
            .collect()
    }

    fn update_job_execution(&self, job_execution: &mut JobExecution) -> Result<(), BatchError> {
        let mut store = self.store.lock();
        let stored = store
            .job_executions
            .iter_mut()
            .find(|execution| execution.id == job_execution.id)
            .ok_or_else(|| BatchError::Job(format!("job execution {} was never saved", job_execution.id)))?;

        if stored.version != job_execution.version {
            debug!(
                "Job execution {} changed in the repository, merging status {}",
                job_execution.id, stored.status
            );
            job_execution.upgrade_status(stored.status);
            job_execution.version = stored.version;
        }

        job_execution.version = Some(job_execution.version.map_or(0, |version| version + 1));
        job_execution.last_updated = Some(Utc::now());
        *stored = job_execution.clone();
        Ok(())
    }

    fn update_job_execution_context(&self, job_execution: &JobExecution) -> Result<(), BatchError> {
        let mut store = self.store.lock();
        let stored = store
            .job_executions
            .iter_mut()
            .find(|execution| execution.id == job_execution.id)
            .ok_or_else(|| BatchError::Job(format!("job execution {} was never saved", job_execution.id)))?;
        stored.execution_context = job_execution.execution_context.clone();
        Ok(())
    }

    fn add_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let mut store = self.store.lock();
        if store
            .step_executions
            .iter()
            .any(|stored| stored.id == step_execution.id)
        {
            return Err(BatchError::Step(format!(
                "step execution {} is already saved",
                step_execution.id
            )));
        }

        step_execution.version = Some(0);
        step_execution.last_updated = Some(Utc::now());
        store.step_executions.push(step_execution.clone());
        Ok(())
    }

    fn update_step_execution(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let mut store = self.store.lock();
        let stored = store
            .step_executions
            .iter_mut()
            .find(|stored| stored.id == step_execution.id)
            .ok_or_else(|| BatchError::Step(format!("step execution {} was never saved", step_execution.id)))?;

        if stored.version != step_execution.version {
            return Err(BatchError::OptimisticLockingFailure(format!(
                "step execution {} of {} has version {:?}, the repository has {:?}",
                step_execution.id, step_execution.step_name, step_execution.version, stored.version
            )));
        }

        step_execution.version = Some(step_execution.version.map_or(0, |version| version + 1));
        step_execution.last_updated = Some(Utc::now());
        *stored = step_execution.clone();

        let stopping = store
            .job_executions
            .iter()
            .any(|execution| execution.id == step_execution.job_execution_id && execution.is_stopping());
        if stopping && !step_execution.is_terminate_only() {
            info!(
                "Parent job execution is stopping, passing the request on to step {}",
                step_execution.step_name
            );
            step_execution.set_terminate_only();
        }
        Ok(())
    }

    fn update_step_execution_context(&self, step_execution: &StepExecution) -> Result<(), BatchError> {
        let mut store = self.store.lock();
        let stored = store
            .step_executions
            .iter_mut()
            .find(|stored| stored.id == step_execution.id)
            .ok_or_else(|| BatchError::Step(format!("step execution {} was never saved", step_execution.id)))?;
        stored.execution_context = step_execution.execution_context.clone();
        Ok(())
    }

    fn get_last_step_execution(&self, job_instance: &JobInstance, step_name: &str) -> Option<StepExecution> {
        self.store
            .lock()
            .step_executions
            .iter()
            .rev()
            .find(|stored| stored.job_instance.id == job_instance.id && stored.step_name == step_name)
            .cloned()
    }

    fn get_step_execution_count(&self, job_instance: &JobInstance, step_name: &str) -> usize {
        self.store
            .lock()
            .step_executions
            .iter()
            .filter(|stored| stored.job_instance.id == job_instance.id && stored.step_name == step_name)
            .count()
    }
}
