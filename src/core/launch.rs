use std::collections::HashMap;

use log::{info, warn};
use uuid::Uuid;

use crate::{BatchError, repository::JobRepository};

use super::{
    execution::JobExecution,
    job::Job,
    parameters::JobParameters,
    status::BatchStatus,
};

/// Runs jobs on the calling thread.
pub struct SimpleJobLauncher<'a> {
    repository: &'a dyn JobRepository,
}

impl<'a> SimpleJobLauncher<'a> {
    pub fn new(repository: &'a dyn JobRepository) -> Self {
        Self { repository }
    }

    /// Creates an execution of `job` for the given parameters and runs it.
    ///
    /// The returned execution carries the outcome of the job, failures
    /// included: an error is returned only when the execution could not be
    /// created.
    ///
    /// # Errors
    /// - `JobRestart` if the job is not restartable and was run before, or a
    ///   step of its last execution is `UNKNOWN`
    /// - any refusal of [`JobRepository::create_job_execution`]
    pub fn run(&self, job: &dyn Job, job_parameters: &JobParameters) -> Result<JobExecution, BatchError> {
        if let Some(last) = self.repository.get_last_job_execution(job.name(), job_parameters) {
            if !job.is_restartable() {
                return Err(BatchError::JobRestart(format!(
                    "job instance of {} already exists and the job is not restartable",
                    job.name()
                )));
            }
            if let Some(step_execution) = last
                .step_executions
                .iter()
                .find(|step_execution| step_execution.status == BatchStatus::Unknown)
            {
                return Err(BatchError::JobRestart(format!(
                    "step {} is of status UNKNOWN",
                    step_execution.step_name
                )));
            }
        }

        let mut job_execution = self.repository.create_job_execution(job, job_parameters)?;
        info!(
            "Job: [{}] launched with the following parameters: [{}]",
            job.name(),
            job_parameters.identifying_key()
        );

        if let Err(error) = job.execute(&mut job_execution) {
            warn!("Job: [{}] failed: {}", job.name(), error);
        }

        info!(
            "Job: [{}] completed with the following parameters: [{}] and the following status: [{}]",
            job.name(),
            job_parameters.identifying_key(),
            job_execution.status
        );
        Ok(job_execution)
    }
}

/// Jobs known by name.
#[derive(Default)]
pub struct JobRegistry<'a> {
    jobs: HashMap<String, Box<dyn Job + 'a>>,
}

impl<'a> JobRegistry<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    /// Returns `BatchError::Configuration` if a job with the same name is
    /// already registered.
    pub fn register(&mut self, job: impl Job + 'a) -> Result<(), BatchError> {
        let name = job.name().to_string();
        if self.jobs.contains_key(&name) {
            return Err(BatchError::Configuration(format!("a job named {name} is already registered")));
        }
        self.jobs.insert(name, Box::new(job));
        Ok(())
    }

    pub fn unregister(&mut self, job_name: &str) {
        self.jobs.remove(job_name);
    }

    /// # Errors
    /// Returns `BatchError::NoSuchJob` for an unknown name.
    pub fn get(&self, job_name: &str) -> Result<&(dyn Job + 'a), BatchError> {
        self.jobs
            .get(job_name)
            .map(|job| job.as_ref())
            .ok_or_else(|| BatchError::NoSuchJob(job_name.to_string()))
    }

    /// Registered names, sorted.
    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Starts, restarts and stops jobs by name or execution id.
pub struct JobOperator<'a> {
    registry: &'a JobRegistry<'a>,
    repository: &'a dyn JobRepository,
    launcher: SimpleJobLauncher<'a>,
}

impl<'a> JobOperator<'a> {
    pub fn new(registry: &'a JobRegistry<'a>, repository: &'a dyn JobRepository) -> Self {
        Self {
            registry,
            repository,
            launcher: SimpleJobLauncher::new(repository),
        }
    }

    pub fn start(&self, job_name: &str, job_parameters: &JobParameters) -> Result<JobExecution, BatchError> {
        let job = self.registry.get(job_name)?;
        self.launcher.run(job, job_parameters)
    }

    /// Runs again the instance of a failed or stopped execution.
    pub fn restart(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let job_execution = self.job_execution(execution_id)?;
        let job = self.registry.get(job_execution.job_name())?;
        self.launcher.run(job, &job_execution.job_parameters)
    }

    /// Asks a running execution to stop. Its steps stop at the next chunk
    /// boundary.
    ///
    /// # Errors
    /// Returns `BatchError::Job` if the execution is unknown or not running.
    pub fn stop(&self, execution_id: Uuid) -> Result<(), BatchError> {
        let mut job_execution = self.job_execution(execution_id)?;
        if !job_execution.is_running() {
            return Err(BatchError::Job(format!(
                "job execution {execution_id} is not running, its status is {}",
                job_execution.status
            )));
        }

        info!("Stopping job execution {} of {}", execution_id, job_execution.job_name());
        job_execution.stop();
        self.repository.update_job_execution(&mut job_execution)
    }

    /// Marks a finished execution so that its instance is never restarted.
    pub fn abandon(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        let mut job_execution = self.job_execution(execution_id)?;
        if job_execution.is_running() {
            return Err(BatchError::Job(format!(
                "job execution {execution_id} is running and cannot be abandoned"
            )));
        }

        job_execution.upgrade_status(BatchStatus::Abandoned);
        job_execution.end_time.get_or_insert_with(chrono::Utc::now);
        self.repository.update_job_execution(&mut job_execution)?;
        Ok(job_execution)
    }

    pub fn running_executions(&self, job_name: &str) -> Result<Vec<Uuid>, BatchError> {
        self.registry.get(job_name)?;
        Ok(self
            .repository
            .find_running_job_executions(job_name)
            .into_iter()
            .map(|job_execution| job_execution.id)
            .collect())
    }

    fn job_execution(&self, execution_id: Uuid) -> Result<JobExecution, BatchError> {
        self.repository
            .get_job_execution(execution_id)
            .ok_or_else(|| BatchError::Job(format!("no job execution with id {execution_id}")))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        core::{
            job::JobBuilder,
            parameters::JobParametersBuilder,
            status::ExitStatus,
            step::StepBuilder,
        },
        item::list::{ListItemReader, ListItemWriter},
        repository::InMemoryJobRepository,
    };

    use super::*;

    #[test]
    fn launcher_refuses_to_run_a_completed_instance_again() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let reader = ListItemReader::new(vec![1, 2]);
        let writer: ListItemWriter<i32> = ListItemWriter::new();
        let step = StepBuilder::new("copy")
            .repository(&repository)
            .chunk(5)
            .reader(&reader)
            .pass_through()
            .writer(&writer)
            .build()?;
        let job = JobBuilder::new()
            .name("copy".to_string())
            .repository(&repository)
            .start(&step)
            .build()?;
        let launcher = SimpleJobLauncher::new(&repository);
        let parameters = JobParametersBuilder::new().add_long("run", 1).build();

        let execution = launcher.run(&job, &parameters)?;
        assert_eq!(execution.status, BatchStatus::Completed);
        assert_eq!(execution.exit_status.exit_code(), ExitStatus::COMPLETED_CODE);

        assert!(matches!(
            launcher.run(&job, &parameters),
            Err(BatchError::JobInstanceAlreadyComplete(_))
        ));
        Ok(())
    }

    #[test]
    fn registry_resolves_jobs_by_name() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let mut registry = JobRegistry::new();
        registry.register(JobBuilder::new().name("nightly".to_string()).repository(&repository).build()?)?;

        assert!(registry.get("nightly").is_ok());
        assert!(matches!(registry.get("weekly"), Err(BatchError::NoSuchJob(name)) if name == "weekly"));
        assert!(matches!(
            registry.register(JobBuilder::new().name("nightly".to_string()).repository(&repository).build()?),
            Err(BatchError::Configuration(_))
        ));
        assert_eq!(registry.job_names(), vec!["nightly".to_string()]);
        Ok(())
    }

    #[test]
    fn operator_only_stops_running_executions() -> Result<(), BatchError> {
        let repository = InMemoryJobRepository::new();
        let mut registry = JobRegistry::new();
        registry.register(JobBuilder::new().name("empty".to_string()).repository(&repository).build()?)?;
        let operator = JobOperator::new(&registry, &repository);

        let execution = operator.start("empty", &JobParameters::new())?;
        assert!(matches!(operator.stop(execution.id), Err(BatchError::Job(_))));
        assert!(matches!(operator.stop(Uuid::new_v4()), Err(BatchError::Job(_))));
        assert!(operator.running_executions("empty")?.is_empty());
        assert!(matches!(operator.start("missing", &JobParameters::new()), Err(BatchError::NoSuchJob(_))));
        Ok(())
    }
}
